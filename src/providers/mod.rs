//! C2 + C3: the provider adaptation layer and its registry.

pub mod anthropic;
pub mod google;
pub mod openai_chat;
pub mod openai_responses;

use crate::types::{AssistantMessage, Conversation, Reasoning, Usage};
use std::sync::Arc;
use std::time::Duration;

/// Options threaded from the scheduler into a single completion call.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub model: String,
    pub api_key: String,
    pub api_endpoint: Option<String>,
    pub api_version: Option<String>,
    pub api_timeout: Option<Duration>,
    pub temperature: Option<f32>,
    pub reasoning: Reasoning,
    /// Remaining token budget for this call, already reduced by the
    /// scheduler's input-size estimate; `None` means unbounded.
    pub max_tokens: Option<u64>,
    pub signal: Option<tokio_util::sync::CancellationToken>,
}

pub struct CompletionOutcome {
    pub result: AssistantMessage,
    pub usage: Usage,
}

/// Translate canonical conversation <-> provider wire format and perform
/// the HTTP call. Never throws: HTTP failure, empty-candidate, and parse
/// failure are all mapped to an `AssistantMessage` with `stopReason.code
/// = error` and zero usage.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn complete(
        &self,
        conversation: &Conversation,
        options: &CompletionOptions,
    ) -> CompletionOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKind {
    OpenAiChatCompletions,
    OpenAiResponses,
    Anthropic,
    Google,
}

/// C3: select the adapter for an API tag. A small closed match, in the
/// same spirit as the teacher's closed enum dispatch elsewhere in the
/// crate — no open-ended plugin registration.
pub fn adapter_for(api: ApiKind) -> Arc<dyn Provider> {
    match api {
        ApiKind::OpenAiChatCompletions => Arc::new(openai_chat::OpenAiChatProvider::new()),
        ApiKind::OpenAiResponses => Arc::new(openai_responses::OpenAiResponsesProvider::new()),
        ApiKind::Anthropic => Arc::new(anthropic::AnthropicProvider::new()),
        ApiKind::Google => Arc::new(google::GoogleProvider::new()),
    }
}

/// Every adapter's system prompt addendum: requires a tool call in every
/// reply and forbids splitting intent from the tool call.
pub fn system_prompt_addendum() -> &'static str {
    "Every reply must include a tool call. Do not split your intent from \
     the tool call into separate messages: state what you are doing and \
     call the tool in the same turn."
}
