//! OpenAI Responses adapter (C2). `input: [items]` keyed by `call_id`;
//! MUST preserve `openaiId`/`openaiStatus` across replay or the provider
//! rejects the replayed assistant message.

use super::{system_prompt_addendum, CompletionOptions, CompletionOutcome, Provider};
use crate::http::{fetch, FetchError, FetchRequest};
use crate::types::{
    AssistantMessage, ContentPart, Conversation, Message, Reasoning, StopCode, StopReason,
    TextPart, Tool, ToolCallPart, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/responses";

pub struct OpenAiResponsesProvider {
    client: reqwest::Client,
}

impl OpenAiResponsesProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for OpenAiResponsesProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ResponsesRequest {
    model: String,
    instructions: String,
    input: Vec<Value>,
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u64>,
    reasoning: ReasoningConfig,
}

#[derive(Serialize)]
struct ReasoningConfig {
    effort: &'static str,
}

fn reasoning_effort(r: Reasoning) -> &'static str {
    match r {
        Reasoning::None => "none",
        Reasoning::Medium => "medium",
        Reasoning::High => "high",
    }
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    name: String,
    description: String,
    parameters: Value,
}

fn to_input_items(conversation: &Conversation) -> Vec<Value> {
    let mut items = Vec::new();
    for message in &conversation.messages {
        match message {
            Message::User(u) => items.push(json!({
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": u.text }],
            })),
            Message::Assistant(a) => {
                let text = a.text();
                if !text.is_empty() {
                    let mut item = json!({
                        "type": "message",
                        "role": "assistant",
                        "content": [{ "type": "output_text", "text": text }],
                    });
                    let obj = item.as_object_mut().unwrap();
                    if let Some(id) = &a.openai_id {
                        obj.insert("id".to_string(), json!(id));
                    }
                    if let Some(status) = &a.openai_status {
                        obj.insert("status".to_string(), json!(status));
                    }
                    items.push(item);
                }
                for tc in a.tool_calls() {
                    let mut call = json!({
                        "type": "function_call",
                        "call_id": tc.id,
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    });
                    if let Some(id) = &tc.openai_id {
                        call.as_object_mut().unwrap().insert("id".to_string(), json!(id));
                    }
                    if let Some(status) = &tc.openai_status {
                        call.as_object_mut()
                            .unwrap()
                            .insert("status".to_string(), json!(status));
                    }
                    items.push(call);

                    if let Some(result) = &tc.result {
                        items.push(json!({
                            "type": "function_call_output",
                            "call_id": tc.id,
                            "output": result.flattened_text(),
                        }));
                    }
                }
                if let Some(err) = &a.tool_error {
                    items.push(json!({
                        "type": "message",
                        "role": "user",
                        "content": [{ "type": "input_text", "text": err }],
                    }));
                }
            }
        }
    }
    items
}

fn to_wire_tools(tools: &[Tool]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            kind: "function",
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.input_schema.clone(),
        })
        .collect()
}

#[derive(Deserialize)]
struct ResponsesResponse {
    id: Option<String>,
    status: Option<String>,
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
}

#[derive(Deserialize)]
struct IncompleteDetails {
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputItem {
    Message {
        id: Option<String>,
        status: Option<String>,
        content: Vec<MessageContent>,
    },
    FunctionCall {
        id: Option<String>,
        status: Option<String>,
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct MessageContent {
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait::async_trait]
impl Provider for OpenAiResponsesProvider {
    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompletionOptions,
    ) -> CompletionOutcome {
        let url = options
            .api_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let body = ResponsesRequest {
            model: options.model.clone(),
            instructions: format!("{}\n\n{}", conversation.system_prompt, system_prompt_addendum()),
            input: to_input_items(conversation),
            tools: to_wire_tools(&conversation.tools),
            temperature: options.temperature,
            max_output_tokens: options.max_tokens,
            reasoning: ReasoningConfig {
                effort: reasoning_effort(options.reasoning),
            },
        };

        let req = FetchRequest {
            method: reqwest::Method::POST,
            url: &url,
            headers: vec![("Authorization", format!("Bearer {}", options.api_key))],
            body: Some(json!(body)),
            timeout: options.api_timeout,
            signal: options.signal.clone(),
        };

        match fetch(&self.client, req).await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.json::<ResponsesResponse>().await {
                    Ok(parsed) => from_wire_response(parsed),
                    Err(err) => error_outcome(format!("failed to parse response: {}", err)),
                },
                Err(err) => error_outcome(format!("HTTP error: {}", err)),
            },
            Err(FetchError::Timeout(ms)) => error_outcome(format!("Fetch timeout after {}ms", ms)),
            Err(err) => error_outcome(err.to_string()),
        }
    }
}

fn from_wire_response(parsed: ResponsesResponse) -> CompletionOutcome {
    let usage = parsed
        .usage
        .map(|u| Usage {
            input: u.input_tokens,
            output: u.output_tokens,
        })
        .unwrap_or_default();

    let stop_code = match parsed.incomplete_details.and_then(|d| d.reason) {
        Some(reason) if reason == "max_output_tokens" => StopCode::MaxTokens,
        _ => StopCode::Ok,
    };

    let mut content = Vec::new();
    let mut openai_id = parsed.id;
    let openai_status = parsed.status;

    for item in parsed.output {
        match item {
            OutputItem::Message { id, status, content: parts } => {
                for part in parts {
                    if let Some(text) = part.text {
                        content.push(ContentPart::Text(TextPart {
                            text,
                            google_thought_signature: None,
                        }));
                    }
                }
                if openai_id.is_none() {
                    openai_id = id;
                }
                let _ = status;
            }
            OutputItem::FunctionCall {
                id,
                status,
                call_id,
                name,
                arguments,
            } => {
                let args: Value = serde_json::from_str(&arguments).unwrap_or(json!({}));
                content.push(ContentPart::ToolCall(ToolCallPart {
                    id: call_id,
                    name,
                    arguments: args,
                    result: None,
                    openai_id: id,
                    openai_status: status,
                    google_thought_signature: None,
                }));
            }
            OutputItem::Unknown => {}
        }
    }

    CompletionOutcome {
        result: AssistantMessage {
            content,
            stop_reason: Some(StopReason {
                code: stop_code,
                message: None,
            }),
            tool_error: None,
            openai_id,
            openai_status,
        },
        usage,
    }
}

fn error_outcome(detail: impl Into<String>) -> CompletionOutcome {
    CompletionOutcome {
        result: AssistantMessage::error(detail),
        usage: Usage::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replayed_assistant_message_carries_openai_id_and_status() {
        let mut assistant = AssistantMessage::text_only("hi");
        assistant.openai_id = Some("msg_1".to_string());
        assistant.openai_status = Some("completed".to_string());
        let conversation = Conversation {
            system_prompt: String::new(),
            messages: vec![Message::Assistant(assistant)],
            tools: vec![],
        };

        let items = to_input_items(&conversation);
        assert_eq!(items[0]["id"], json!("msg_1"));
        assert_eq!(items[0]["status"], json!("completed"));
    }

    #[test]
    fn function_call_carries_openai_id_through_round_trip() {
        let mut assistant = AssistantMessage::default();
        assistant.content.push(ContentPart::ToolCall(ToolCallPart {
            id: "call_1".to_string(),
            name: "push".to_string(),
            arguments: json!({ "n": 1 }),
            result: None,
            openai_id: Some("fc_1".to_string()),
            openai_status: Some("completed".to_string()),
            google_thought_signature: None,
        }));
        let conversation = Conversation {
            system_prompt: String::new(),
            messages: vec![Message::Assistant(assistant)],
            tools: vec![],
        };

        let items = to_input_items(&conversation);
        assert_eq!(items[0]["id"], json!("fc_1"));
        assert_eq!(items[0]["status"], json!("completed"));
    }

    #[test]
    fn incomplete_max_output_tokens_maps_to_max_tokens() {
        let parsed = ResponsesResponse {
            id: Some("resp_1".to_string()),
            status: Some("incomplete".to_string()),
            output: vec![],
            usage: None,
            incomplete_details: Some(IncompleteDetails {
                reason: Some("max_output_tokens".to_string()),
            }),
        };
        let outcome = from_wire_response(parsed);
        assert_eq!(
            outcome.result.stop_reason.unwrap().code,
            crate::types::StopCode::MaxTokens
        );
        assert_eq!(outcome.result.openai_id.as_deref(), Some("resp_1"));
    }
}
