//! Google (Gemini) adapter (C2). `Content` items with `role ∈ {user,
//! model, function}`; MUST preserve `thoughtSignature` on every
//! text/tool-call part across round-trip, since Gemini rejects a
//! replayed reasoning part that doesn't echo it back verbatim. Grounded
//! in the teacher's `GeminiToolCallMeta` side-table, simplified here
//! because the canonical `ToolCallPart`/`TextPart` now carry the echo
//! field directly instead of needing a side channel keyed by call id.

use super::{system_prompt_addendum, CompletionOptions, CompletionOutcome, Provider};
use crate::http::{fetch, FetchError, FetchRequest};
use crate::types::{
    AssistantMessage, ContentPart, Conversation, Message, StopCode, StopReason, TextPart, Tool,
    ToolCallPart, Usage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_ENDPOINT_TEMPLATE: &str = "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent";

pub struct GoogleProvider {
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for GoogleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    system_instruction: SystemInstruction,
    contents: Vec<WireContent>,
    tools: Vec<WireToolSet>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct SystemInstruction {
    parts: Vec<Value>,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "maxOutputTokens")]
    max_output_tokens: Option<u64>,
}

#[derive(Serialize)]
struct WireContent {
    role: &'static str,
    parts: Vec<Value>,
}

#[derive(Serialize)]
struct WireToolSet {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<WireFunctionDeclaration>,
}

#[derive(Serialize)]
struct WireFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

fn to_wire_contents(conversation: &Conversation) -> Vec<WireContent> {
    let mut out = Vec::new();
    for message in &conversation.messages {
        match message {
            Message::User(u) => out.push(WireContent {
                role: "user",
                parts: vec![json!({ "text": u.text })],
            }),
            Message::Assistant(a) => {
                let mut model_parts = Vec::new();
                let mut function_parts = Vec::new();
                let mut image_parts = Vec::new();

                for part in &a.content {
                    match part {
                        ContentPart::Text(t) => {
                            let mut p = json!({ "text": t.text });
                            if let Some(sig) = &t.google_thought_signature {
                                p.as_object_mut()
                                    .unwrap()
                                    .insert("thoughtSignature".to_string(), json!(sig));
                            }
                            model_parts.push(p);
                        }
                        ContentPart::ToolCall(tc) => {
                            let mut p = json!({
                                "functionCall": { "name": tc.name, "args": tc.arguments }
                            });
                            if let Some(sig) = &tc.google_thought_signature {
                                p.as_object_mut()
                                    .unwrap()
                                    .insert("thoughtSignature".to_string(), json!(sig));
                            }
                            model_parts.push(p);

                            if let Some(result) = &tc.result {
                                function_parts.push(json!({
                                    "functionResponse": {
                                        "name": tc.name,
                                        "response": { "result": result.flattened_text() }
                                    }
                                }));
                                for content in &result.content {
                                    if let crate::types::ToolResultContent::Image(img) = content {
                                        image_parts.push(json!({
                                            "inline_data": { "mime_type": img.mime_type, "data": img.data }
                                        }));
                                    }
                                }
                            }
                        }
                    }
                }

                if !model_parts.is_empty() {
                    out.push(WireContent {
                        role: "model",
                        parts: model_parts,
                    });
                }
                if !function_parts.is_empty() {
                    out.push(WireContent {
                        role: "function",
                        parts: function_parts,
                    });
                }
                if !image_parts.is_empty() {
                    out.push(WireContent {
                        role: "user",
                        parts: image_parts,
                    });
                }
                if let Some(err) = &a.tool_error {
                    out.push(WireContent {
                        role: "user",
                        parts: vec![json!({ "text": err })],
                    });
                }
            }
        }
    }
    out
}

fn to_wire_tools(tools: &[Tool]) -> Vec<WireToolSet> {
    if tools.is_empty() {
        return Vec::new();
    }
    vec![WireToolSet {
        function_declarations: tools
            .iter()
            .map(|t| WireFunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: strip_unsupported(&t.input_schema),
            })
            .collect(),
    }]
}

fn strip_unsupported(schema: &Value) -> Value {
    let mut cleaned = schema.clone();
    if let Some(obj) = cleaned.as_object_mut() {
        obj.remove("additionalProperties");
        obj.remove("$schema");
    }
    cleaned
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<FunctionCallPart>,
    #[serde(rename = "thoughtSignature")]
    thought_signature: Option<String>,
}

#[derive(Deserialize)]
struct FunctionCallPart {
    name: String,
    args: Value,
}

#[derive(Deserialize, Default)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}

#[async_trait::async_trait]
impl Provider for GoogleProvider {
    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompletionOptions,
    ) -> CompletionOutcome {
        let url = options.api_endpoint.clone().unwrap_or_else(|| {
            DEFAULT_ENDPOINT_TEMPLATE.replace("{model}", &options.model)
        });

        let body = GenerateRequest {
            system_instruction: SystemInstruction {
                parts: vec![json!({
                    "text": format!("{}\n\n{}", conversation.system_prompt, system_prompt_addendum())
                })],
            },
            contents: to_wire_contents(conversation),
            tools: to_wire_tools(&conversation.tools),
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        };

        let req = FetchRequest {
            method: reqwest::Method::POST,
            url: &url,
            headers: vec![("x-goog-api-key", options.api_key.clone())],
            body: Some(json!(body)),
            timeout: options.api_timeout,
            signal: options.signal.clone(),
        };

        match fetch(&self.client, req).await {
            Ok(response) => match response.error_for_status() {
                Ok(response) => match response.json::<GenerateResponse>().await {
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

fn from_wire_response(parsed: GenerateResponse) -> CompletionOutcome {
    let usage = parsed
        .usage_metadata
        .map(|u| Usage {
            input: u.prompt_token_count,
            output: u.candidates_token_count,
        })
        .unwrap_or_default();

    let candidate = match parsed.candidates.into_iter().next() {
        Some(c) => c,
        None => {
            return CompletionOutcome {
                result: AssistantMessage::error("provider returned no candidates"),
                usage,
            }
        }
    };

    let stop_code = match candidate.finish_reason.as_deref() {
        Some("MAX_TOKENS") => StopCode::MaxTokens,
        _ => StopCode::Ok,
    };

    let mut content = Vec::new();
    let mut call_counter = 0u64;
    if let Some(c) = candidate.content {
        for part in c.parts {
            if let Some(text) = part.text {
                content.push(ContentPart::Text(TextPart {
                    text,
                    google_thought_signature: part.thought_signature.clone(),
                }));
            } else if let Some(call) = part.function_call {
                call_counter += 1;
                content.push(ContentPart::ToolCall(ToolCallPart {
                    id: format!("call_{}", call_counter),
                    name: call.name,
                    arguments: call.args,
                    result: None,
                    openai_id: None,
                    openai_status: None,
                    google_thought_signature: part.thought_signature,
                }));
            }
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

    #[test]
    fn thought_signature_is_echoed_on_text_and_tool_call_parts() {
        let mut assistant = AssistantMessage::default();
        assistant.content.push(ContentPart::Text(TextPart {
            text: "thinking".to_string(),
            google_thought_signature: Some("sig-1".to_string()),
        }));
        assistant.content.push(ContentPart::ToolCall(ToolCallPart {
            id: "call_1".to_string(),
            name: "push".to_string(),
            arguments: json!({ "n": 1 }),
            result: None,
            openai_id: None,
            openai_status: None,
            google_thought_signature: Some("sig-2".to_string()),
        }));
        let conversation = Conversation {
            system_prompt: String::new(),
            messages: vec![Message::Assistant(assistant)],
            tools: vec![],
        };

        let wire = to_wire_contents(&conversation);
        let model = wire.iter().find(|c| c.role == "model").unwrap();
        assert_eq!(model.parts[0]["thoughtSignature"], json!("sig-1"));
        assert_eq!(model.parts[1]["thoughtSignature"], json!("sig-2"));
    }

    #[test]
    fn function_calls_get_synthetic_sequential_ids() {
        let parsed = GenerateResponse {
            candidates: vec![Candidate {
                content: Some(ResponseContent {
                    parts: vec![
                        ResponsePart {
                            text: None,
                            function_call: Some(FunctionCallPart {
                                name: "push".to_string(),
                                args: json!({ "n": 1 }),
                            }),
                            thought_signature: None,
                        },
                        ResponsePart {
                            text: None,
                            function_call: Some(FunctionCallPart {
                                name: "push".to_string(),
                                args: json!({ "n": 2 }),
                            }),
                            thought_signature: None,
                        },
                    ],
                }),
                finish_reason: None,
            }],
            usage_metadata: None,
        };

        let outcome = from_wire_response(parsed);
        let ids: Vec<&str> = outcome
            .result
            .tool_calls()
            .map(|tc| tc.id.as_str())
            .collect();
        assert_eq!(ids, vec!["call_1", "call_2"]);
    }

    #[test]
    fn empty_candidates_becomes_error_outcome() {
        let outcome = from_wire_response(GenerateResponse {
            candidates: vec![],
            usage_metadata: None,
        });
        assert_eq!(
            outcome.result.stop_reason.unwrap().code,
            crate::types::StopCode::Error
        );
    }
}
