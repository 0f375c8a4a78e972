//! OpenAI Chat Completions adapter (C2). Flat `messages` array, tool
//! calls/results interleaved as separate messages, whole-response only.

use super::{system_prompt_addendum, CompletionOptions, CompletionOutcome, Provider};
use crate::http::{fetch, FetchError, FetchRequest};
use crate::types::{
    AssistantMessage, ContentPart, Conversation, Message, StopCode, StopReason, TextPart, Tool,
    ToolCallPart, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiChatProvider {
    client: reqwest::Client,
}

impl OpenAiChatProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for OpenAiChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    tools: Vec<WireTool>,
    parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "role", rename_all = "lowercase")]
enum WireMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<WireToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn to_wire_messages(conversation: &Conversation) -> Vec<WireMessage> {
    let mut out = vec![WireMessage::System {
        content: format!("{}\n\n{}", conversation.system_prompt, system_prompt_addendum()),
    }];

    for message in &conversation.messages {
        match message {
            Message::User(u) => out.push(WireMessage::User {
                content: u.text.clone(),
            }),
            Message::Assistant(a) => {
                let text = a.text();
                let tool_calls: Vec<WireToolCall> = a
                    .tool_calls()
                    .map(|tc| WireToolCall {
                        id: tc.id.clone(),
                        kind: "function".to_string(),
                        function: WireFunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect();
                out.push(WireMessage::Assistant {
                    content: if text.is_empty() { None } else { Some(text) },
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(tool_calls)
                    },
                });
                for tc in a.tool_calls() {
                    if let Some(result) = &tc.result {
                        out.push(WireMessage::Tool {
                            tool_call_id: tc.id.clone(),
                            content: result.flattened_text(),
                        });
                    }
                }
                if let Some(err) = &a.tool_error {
                    out.push(WireMessage::User {
                        content: err.clone(),
                    });
                }
            }
        }
    }
    out
}

fn to_wire_tools(tools: &[Tool]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|t| WireTool {
            kind: "function",
            function: WireFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: strip_unsupported_schema_fields(&t.input_schema),
            },
        })
        .collect()
}

fn strip_unsupported_schema_fields(schema: &Value) -> Value {
    // OpenAI Chat Completions accepts plain JSON Schema as-is.
    schema.clone()
}

#[async_trait::async_trait]
impl Provider for OpenAiChatProvider {
    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompletionOptions,
    ) -> CompletionOutcome {
        let url = options
            .api_endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());

        let body = ChatRequest {
            model: options.model.clone(),
            messages: to_wire_messages(conversation),
            tools: to_wire_tools(&conversation.tools),
            parallel_tool_calls: false,
            temperature: options.temperature,
            max_completion_tokens: options.max_tokens,
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
                Ok(response) => match response.json::<ChatResponse>().await {
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

fn from_wire_response(parsed: ChatResponse) -> CompletionOutcome {
    let usage = parsed
        .usage
        .map(|u| Usage {
            input: u.prompt_tokens,
            output: u.completion_tokens,
        })
        .unwrap_or_default();

    let choice = match parsed.choices.into_iter().next() {
        Some(c) => c,
        None => {
            return CompletionOutcome {
                result: AssistantMessage::error("provider returned no choices"),
                usage,
            }
        }
    };

    let stop_code = match choice.finish_reason.as_deref() {
        Some("length") => StopCode::MaxTokens,
        _ => StopCode::Ok,
    };

    let mut content = Vec::new();
    if let Some(text) = choice.message.content {
        if !text.is_empty() {
            content.push(ContentPart::Text(TextPart {
                text,
                google_thought_signature: None,
            }));
        }
    }
    for tc in choice.message.tool_calls {
        let arguments: Value = serde_json::from_str(&tc.function.arguments).unwrap_or(json!({}));
        content.push(ContentPart::ToolCall(ToolCallPart {
            id: tc.id,
            name: tc.function.name,
            arguments,
            result: None,
            openai_id: None,
            openai_status: None,
            google_thought_signature: None,
        }));
    }

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

    fn conversation_with_tool_turn() -> Conversation {
        let mut assistant = AssistantMessage::text_only("calling the tool");
        assistant.content.push(ContentPart::ToolCall(ToolCallPart {
            id: "call_1".to_string(),
            name: "push".to_string(),
            arguments: json!({ "n": 1 }),
            result: Some(crate::types::ToolResult::text("done")),
            openai_id: None,
            openai_status: None,
            google_thought_signature: None,
        }));
        Conversation {
            system_prompt: "be helpful".to_string(),
            messages: vec![Message::user("push 1"), Message::Assistant(assistant)],
            tools: vec![],
        }
    }

    #[test]
    fn tool_call_and_result_become_assistant_and_tool_messages() {
        let wire = to_wire_messages(&conversation_with_tool_turn());
        assert!(matches!(wire[0], WireMessage::System { .. }));
        assert!(matches!(wire[1], WireMessage::User { .. }));
        match &wire[2] {
            WireMessage::Assistant { tool_calls, .. } => {
                assert_eq!(tool_calls.as_ref().unwrap()[0].function.name, "push");
            }
            other => panic!("expected assistant message, got {:?}", other),
        }
        assert!(matches!(wire[3], WireMessage::Tool { .. }));
    }

    #[test]
    fn finish_reason_length_maps_to_max_tokens() {
        let parsed = ChatResponse {
            choices: vec![ChatChoice {
                message: ResponseMessage {
                    content: Some("truncated".to_string()),
                    tool_calls: vec![],
                },
                finish_reason: Some("length".to_string()),
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            }),
        };
        let outcome = from_wire_response(parsed);
        assert_eq!(
            outcome.result.stop_reason.unwrap().code,
            crate::types::StopCode::MaxTokens
        );
        assert_eq!(outcome.usage.input, 10);
        assert_eq!(outcome.usage.output, 5);
    }

    #[test]
    fn empty_choices_becomes_error_outcome() {
        let outcome = from_wire_response(ChatResponse {
            choices: vec![],
            usage: None,
        });
        assert_eq!(
            outcome.result.stop_reason.unwrap().code,
            crate::types::StopCode::Error
        );
    }
}
