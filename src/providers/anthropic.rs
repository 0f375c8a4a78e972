//! Anthropic adapter (C2). Multi-part content blocks; tool results packed
//! into a user message, merging consecutive tool-result messages.

use super::{system_prompt_addendum, CompletionOptions, CompletionOutcome, Provider};
use crate::http::{fetch, FetchError, FetchRequest};
use crate::types::{
    AssistantMessage, ContentPart, Conversation, Message, StopCode, StopReason, TextPart, Tool,
    ToolCallPart, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    system: String,
    messages: Vec<WireMessage>,
    tools: Vec<WireTool>,
    max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Serialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: Value,
}

fn to_wire_messages(conversation: &Conversation) -> Vec<WireMessage> {
    let mut out: Vec<WireMessage> = Vec::new();

    for message in &conversation.messages {
        match message {
            Message::User(u) => out.push(WireMessage {
                role: "user",
                content: vec![json!({ "type": "text", "text": u.text })],
            }),
            Message::Assistant(a) => {
                let mut blocks = Vec::new();
                for part in &a.content {
                    match part {
                        ContentPart::Text(t) => {
                            blocks.push(json!({ "type": "text", "text": t.text }));
                        }
                        ContentPart::ToolCall(tc) => {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": tc.arguments,
                            }));
                        }
                    }
                }
                out.push(WireMessage {
                    role: "assistant",
                    content: blocks,
                });

                let tool_results: Vec<Value> = a
                    .tool_calls()
                    .filter_map(|tc| {
                        tc.result.as_ref().map(|r| {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": tc.id,
                                "content": r.flattened_text(),
                                "is_error": r.is_error(),
                            })
                        })
                    })
                    .collect();

                push_or_merge_tool_results(&mut out, tool_results);

                if let Some(err) = &a.tool_error {
                    out.push(WireMessage {
                        role: "user",
                        content: vec![json!({ "type": "text", "text": err })],
                    });
                }
            }
        }
    }
    out
}

/// Consecutive tool results for adjacent calls are merged into a single
/// user message rather than one user message per tool result.
fn push_or_merge_tool_results(out: &mut Vec<WireMessage>, tool_results: Vec<Value>) {
    if tool_results.is_empty() {
        return;
    }
    if let Some(last) = out.last_mut() {
        if last.role == "user" && last.content.iter().all(|c| c["type"] == "tool_result") {
            last.content.extend(tool_results);
            return;
        }
    }
    out.push(WireMessage {
        role: "user",
        content: tool_results,
    });
}

fn to_wire_tools(tools: &[Tool]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        })
        .collect()
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompletionOptions,
    ) -> CompletionOutcome {
        let url = options
            .api_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let body = MessagesRequest {
            model: options.model.clone(),
            system: format!("{}\n\n{}", conversation.system_prompt, system_prompt_addendum()),
            messages: to_wire_messages(conversation),
            tools: to_wire_tools(&conversation.tools),
            max_tokens: options.max_tokens.unwrap_or(4096),
            temperature: options.temperature,
        };

        let req = FetchRequest {
            method: reqwest::Method::POST,
            url: &url,
            headers: vec![
                ("x-api-key", options.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body: Some(json!(body)),
            timeout: options.api_timeout,
            signal: options.signal.clone(),
        };

        match fetch(&self.client, req).await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.json::<MessagesResponse>().await {
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

fn from_wire_response(parsed: MessagesResponse) -> CompletionOutcome {
    let usage = parsed
        .usage
        .map(|u| Usage {
            input: u.input_tokens,
            output: u.output_tokens,
        })
        .unwrap_or_default();

    let stop_code = match parsed.stop_reason.as_deref() {
        Some("max_tokens") => StopCode::MaxTokens,
        _ => StopCode::Ok,
    };

    let content = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(ContentPart::Text(TextPart {
                text,
                google_thought_signature: None,
            })),
            ResponseBlock::ToolUse { id, name, input } => Some(ContentPart::ToolCall(ToolCallPart {
                id,
                name,
                arguments: input,
                result: None,
                openai_id: None,
                openai_status: None,
                google_thought_signature: None,
            })),
            ResponseBlock::Unknown => None,
        })
        .collect();

    CompletionOutcome {
        result: AssistantMessage {
            content,
            stop_reason: Some(StopReason {
                code: stop_code,
                message: None,
            }),
            tool_error: None,
            openai_id: None,
            openai_status: None,
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
    use crate::types::ToolResult;

    #[test]
    fn consecutive_tool_results_merge_into_one_user_message() {
        let mut assistant = AssistantMessage::default();
        for (id, n) in [("call_1", 1), ("call_2", 2)] {
            assistant.content.push(ContentPart::ToolCall(ToolCallPart {
                id: id.to_string(),
                name: "push".to_string(),
                arguments: json!({ "n": n }),
                result: Some(ToolResult::text(format!("ok {}", n))),
                openai_id: None,
                openai_status: None,
                google_thought_signature: None,
            }));
        }
        let conversation = Conversation {
            system_prompt: String::new(),
            messages: vec![Message::Assistant(assistant)],
            tools: vec![],
        };

        let wire = to_wire_messages(&conversation);
        let user_messages: Vec<_> = wire.iter().filter(|m| m.role == "user").collect();
        assert_eq!(user_messages.len(), 1);
        assert_eq!(user_messages[0].content.len(), 2);
    }

    #[test]
    fn stop_reason_max_tokens_is_mapped() {
        let parsed = MessagesResponse {
            content: vec![ResponseBlock::Text {
                text: "truncated".to_string(),
            }],
            stop_reason: Some("max_tokens".to_string()),
            usage: Some(AnthropicUsage {
                input_tokens: 3,
                output_tokens: 4,
            }),
        };
        let outcome = from_wire_response(parsed);
        assert_eq!(
            outcome.result.stop_reason.unwrap().code,
            crate::types::StopCode::MaxTokens
        );
        assert_eq!(outcome.usage.total(), 7);
    }
}
