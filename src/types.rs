//! Canonical data shapes shared by every component: messages, content
//! parts, tools, tool results and usage counters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Message::User(UserMessage { text: text.into() })
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_assistant_mut(&mut self) -> Option<&mut AssistantMessage> {
        match self {
            Message::Assistant(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AssistantMessage {
    pub content: Vec<ContentPart>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,

    /// Protocol-violation hint fed back to the model on the next turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<String>,

    /// Required by OpenAI Responses to accept a replayed assistant message.
    #[serde(skip_serializing_if = "Option::is_none", rename = "openaiId")]
    pub openai_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "openaiStatus")]
    pub openai_status: Option<String>,
}

impl AssistantMessage {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::Text(TextPart {
                text: text.into(),
                google_thought_signature: None,
            })],
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Vec::new(),
            stop_reason: Some(StopReason {
                code: StopCode::Error,
                message: Some(message.into()),
            }),
            ..Default::default()
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.content.iter().filter_map(|p| match p {
            ContentPart::ToolCall(t) => Some(t),
            _ => None,
        })
    }

    pub fn tool_calls_mut(&mut self) -> impl Iterator<Item = &mut ToolCallPart> {
        self.content.iter_mut().filter_map(|p| match p {
            ContentPart::ToolCall(t) => Some(t),
            _ => None,
        })
    }

    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopReason {
    pub code: StopCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCode {
    Ok,
    MaxTokens,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentPart {
    Text(TextPart),
    ToolCall(ToolCallPart),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none", rename = "googleThoughtSignature")]
    pub google_thought_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "openaiId")]
    pub openai_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "openaiStatus")]
    pub openai_status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "googleThoughtSignature")]
    pub google_thought_signature: Option<String>,
}

/// A callable the assistant may invoke, described as a JSON-Schema-like
/// input shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolResult {
    pub content: Vec<ToolResultContent>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "isError")]
    pub is_error: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "_meta")]
    pub meta: Option<ToolResultMeta>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::Text(PlainText { text: text.into() })],
            is_error: None,
            meta: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::Text(PlainText { text: text.into() })],
            is_error: Some(true),
            meta: None,
        }
    }

    pub fn image(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            content: vec![ToolResultContent::Image(ImagePart::from_bytes(mime_type, bytes))],
            is_error: None,
            meta: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.is_error.unwrap_or(false)
    }

    pub fn flattened_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolResultContent::Text(t) => t.text.clone(),
                ToolResultContent::Image(i) => format!("[image: {}]", i.mime_type),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolResultContent {
    Text(PlainText),
    Image(ImagePart),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlainText {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePart {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Base64-encoded image bytes (standard alphabet, with padding).
    pub data: String,
}

impl ImagePart {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        use base64::Engine;
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.decode(&self.data)
    }
}

pub const META_HISTORY: &str = "dev.lowire/history";
pub const META_STATE: &str = "dev.lowire/state";
pub const META_INTENT: &str = "dev.lowire/intent";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolResultMeta {
    #[serde(skip_serializing_if = "Option::is_none", rename = "dev.lowire/history")]
    pub history: Option<Vec<HistoryItem>>,

    #[serde(skip_serializing_if = "Option::is_none", rename = "dev.lowire/state")]
    pub state: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryItem {
    pub category: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input += other.input;
        self.output += other.output;
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reasoning {
    None,
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_part_round_trips_through_base64() {
        let bytes = b"not really a png";
        let part = ImagePart::from_bytes("image/png", bytes);
        assert_eq!(part.decode().unwrap(), bytes);
    }

    #[test]
    fn tool_result_image_is_flagged_as_image_not_error() {
        let result = ToolResult::image("image/png", b"bytes");
        assert!(!result.is_error());
        assert!(matches!(result.content[0], ToolResultContent::Image(_)));
    }
}
