//! C7: the turn scheduler / state machine. Generalizes the teacher's
//! `chat_loop_with_tools` round-counting loop into a full budgeted state
//! machine with event hooks, tool dispatch, the replay cache, and the
//! summarizer.

use crate::cache::ReplayCache;
use crate::providers::{ApiKind, CompletionOptions, Provider};
use crate::secrets;
use crate::summarize::summarize;
use crate::tool_wrap::{is_done, wrap_tools};
use crate::types::{
    Conversation, Message, Reasoning, Tool, ToolResult, Usage, META_HISTORY, META_INTENT,
    META_STATE,
};
use futures::future::BoxFuture;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type ToolCallback =
    Arc<dyn Fn(ToolCallRequest) -> BoxFuture<'static, Result<ToolResult, String>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Continue,
    Disallow,
}

pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;
pub type BeforeToolCallHook =
    Arc<dyn Fn(&str, &serde_json::Value) -> BoxFuture<'static, HookOutcome> + Send + Sync>;
pub type AfterToolCallHook =
    Arc<dyn Fn(&str, &ToolResult) -> BoxFuture<'static, HookOutcome> + Send + Sync>;
pub type ToolErrorHook = Arc<dyn Fn(&str, &str) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    pub on_before_turn: Option<Hook>,
    pub on_after_turn: Option<Hook>,
    pub on_before_tool_call: Option<BeforeToolCallHook>,
    pub on_after_tool_call: Option<AfterToolCallHook>,
    pub on_tool_call_error: Option<ToolErrorHook>,
}

/// Recognized options for a run (spec §4.1).
pub struct LoopOptions {
    pub model: String,
    pub api: ApiKind,
    pub api_key: String,
    pub api_endpoint: Option<String>,
    pub api_version: Option<String>,
    pub api_timeout: Option<Duration>,
    pub temperature: Option<f32>,
    pub reasoning: Reasoning,
    pub max_tokens: Option<u64>,

    pub tools: Vec<Tool>,
    pub call_tool: ToolCallback,

    pub max_turns: u32,
    pub max_tool_calls: Option<i64>,
    pub max_tool_call_retries: Option<i64>,

    pub cache: Option<ReplayCache>,
    pub secrets: HashMap<String, String>,
    pub summarize: bool,
    pub abort_controller: Option<CancellationToken>,
    pub hooks: Hooks,
}

impl LoopOptions {
    pub fn new(model: impl Into<String>, api: ApiKind, api_key: impl Into<String>, call_tool: ToolCallback) -> Self {
        Self {
            model: model.into(),
            api,
            api_key: api_key.into(),
            api_endpoint: None,
            api_version: None,
            api_timeout: None,
            temperature: None,
            reasoning: Reasoning::None,
            max_tokens: None,
            tools: Vec::new(),
            call_tool,
            max_turns: 100,
            max_tool_calls: None,
            max_tool_call_retries: None,
            cache: None,
            secrets: HashMap::new(),
            summarize: false,
            abort_controller: None,
            hooks: Hooks::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_tool_calls(mut self, n: i64) -> Self {
        self.max_tool_calls = Some(n);
        self
    }

    pub fn with_max_tool_call_retries(mut self, n: i64) -> Self {
        self.max_tool_call_retries = Some(n);
        self
    }

    pub fn with_summarize(mut self, summarize: bool) -> Self {
        self.summarize = summarize;
        self
    }

    /// Reads the provider-appropriate API key from the environment
    /// (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GOOGLE_API_KEY`) and builds
    /// a `LoopOptions` from it. Everything else (`tools`, budgets, hooks)
    /// is still the caller's job via the builder methods.
    pub fn from_env(
        model: impl Into<String>,
        api: ApiKind,
        call_tool: ToolCallback,
    ) -> Result<Self, crate::error::LoopError> {
        let var = match api {
            ApiKind::OpenAiChatCompletions | ApiKind::OpenAiResponses => "OPENAI_API_KEY",
            ApiKind::Anthropic => "ANTHROPIC_API_KEY",
            ApiKind::Google => "GOOGLE_API_KEY",
        };
        let api_key = std::env::var(var)
            .map_err(|_| crate::error::LoopError::Config(format!("{} environment variable not set", var)))?;
        Ok(Self::new(model, api, api_key, call_tool))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStatus {
    Ok,
    Break,
    Error,
}

pub struct LoopOutcome {
    pub status: LoopStatus,
    pub result: Option<ToolResult>,
    pub error: Option<String>,
    pub usage: Usage,
    pub turns: u32,
}

struct Budget {
    tokens: Option<i64>,
    tool_calls: Option<i64>,
    tool_call_retries: Option<i64>,
    max_tool_call_retries: Option<i64>,
}

pub struct Loop {
    provider: Arc<dyn Provider>,
    options: LoopOptions,
    cache: ReplayCache,
}

impl Loop {
    /// Selects the adapter for `options.api` via the provider registry (C3).
    pub fn new(options: LoopOptions) -> Self {
        let provider = crate::providers::adapter_for(options.api);
        Self::with_provider(provider, options)
    }

    /// Binds to an explicit provider, bypassing registry selection. Used
    /// by tests to substitute a deterministic fake provider.
    pub fn with_provider(provider: Arc<dyn Provider>, options: LoopOptions) -> Self {
        let cache = options.cache.clone().unwrap_or_default();
        Self {
            provider,
            options,
            cache,
        }
    }

    /// The output replay cache, readable after the run completes.
    pub fn output_cache(&self) -> &ReplayCache {
        &self.cache
    }

    pub async fn run(&mut self, task: &str) -> LoopOutcome {
        let tools = wrap_tools(&self.options.tools);
        let mut conversation = Conversation {
            system_prompt: String::new(),
            messages: vec![Message::user(task)],
            tools,
        };

        let mut budget = Budget {
            tokens: self.options.max_tokens.map(|t| t as i64),
            tool_calls: self.options.max_tool_calls,
            tool_call_retries: self.options.max_tool_call_retries,
            max_tool_call_retries: self.options.max_tool_call_retries,
        };

        let mut usage_total = Usage::default();
        let mut turn: u32 = 0;

        loop {
            if turn >= self.options.max_turns {
                return self.error_outcome(
                    "Failed to perform step, max attempts reached",
                    usage_total,
                    turn,
                );
            }

            // BUDGET_CHECK
            if let Some(tokens) = budget.tokens {
                if tokens <= 0 {
                    return self.error_outcome(
                        format!("Budget tokens {} exhausted", self.options.max_tokens.unwrap_or(0)),
                        usage_total,
                        turn,
                    );
                }
            }

            let view_messages = if self.options.summarize {
                summarize(task, &conversation.messages)
            } else {
                conversation.messages.clone()
            };
            let view = Conversation {
                system_prompt: conversation.system_prompt.clone(),
                messages: view_messages,
                tools: conversation.tools.clone(),
            };

            let estimate = (serde_json::to_string(&view).unwrap_or_default().len() / 4) as i64;
            if let Some(tokens) = budget.tokens {
                if estimate >= tokens {
                    return self.error_outcome(
                        format!(
                            "Input token estimate {} exceeds budget {}",
                            estimate,
                            self.options.max_tokens.unwrap_or(0)
                        ),
                        usage_total,
                        turn,
                    );
                }
            }

            if let Some(hook) = &self.options.hooks.on_before_turn {
                hook().await;
            }
            if self.is_cancelled() {
                return self.break_outcome(usage_total, turn);
            }

            let call_max_tokens = budget.tokens.map(|t| (t - estimate).max(0) as u64);
            let completion_options = CompletionOptions {
                model: self.options.model.clone(),
                api_key: self.options.api_key.clone(),
                api_endpoint: self.options.api_endpoint.clone(),
                api_version: self.options.api_version.clone(),
                api_timeout: self.options.api_timeout,
                temperature: self.options.temperature,
                reasoning: self.options.reasoning,
                max_tokens: call_max_tokens,
                signal: self.options.abort_controller.clone(),
            };

            let provider = Arc::clone(&self.provider);
            let completion_view = view.clone();
            let turn_usage: Arc<std::sync::Mutex<Usage>> = Arc::new(std::sync::Mutex::new(Usage::default()));
            let turn_usage_sink = Arc::clone(&turn_usage);
            let outcome = self
                .cache
                .complete(&view, move || {
                    let provider = Arc::clone(&provider);
                    async move {
                        let outcome = provider.complete(&completion_view, &completion_options).await;
                        *turn_usage_sink.lock().unwrap() = outcome.usage;
                        outcome.result
                    }
                })
                .await;
            // A cache hit never runs the closure above, so `turn_usage`
            // stays zero for replayed turns by construction.
            usage_total.add(*turn_usage.lock().unwrap());

            if self.is_cancelled() {
                return self.break_outcome(usage_total, turn);
            }

            let stop_code = outcome
                .stop_reason
                .as_ref()
                .map(|s| s.code)
                .unwrap_or(crate::types::StopCode::Ok);

            match stop_code {
                crate::types::StopCode::Error => {
                    let message = outcome
                        .stop_reason
                        .as_ref()
                        .and_then(|s| s.message.clone())
                        .unwrap_or_else(|| "provider error".to_string());
                    return self.error_outcome(message, usage_total, turn);
                }
                crate::types::StopCode::MaxTokens => {
                    return self.error_outcome("Max tokens exhausted", usage_total, turn);
                }
                crate::types::StopCode::Ok => {}
            }

            if let Some(tokens) = budget.tokens.as_mut() {
                *tokens -= turn_usage.lock().unwrap().total() as i64;
            }

            let mut assistant_message = outcome;
            conversation.messages.push(Message::Assistant(assistant_message.clone()));

            if let Some(hook) = &self.options.hooks.on_after_turn {
                hook().await;
            }
            if self.is_cancelled() {
                return self.break_outcome(usage_total, turn);
            }

            let call_count = assistant_message.tool_calls().count();
            if call_count == 0 {
                if let Some(last) = conversation.messages.last_mut().and_then(|m| m.as_assistant_mut()) {
                    last.tool_error = Some(
                        "Error: tool call is expected in every assistant message. Call the \"report_result\" tool when the task is complete.".to_string(),
                    );
                }
                turn += 1;
                continue;
            }

            let intent = assistant_message.text();
            let mut any_error = false;
            let mut done: Option<ToolResult> = None;

            let call_ids: Vec<String> = assistant_message.tool_calls().map(|c| c.id.clone()).collect();
            for call_id in call_ids {
                if let Some(limit) = budget.tool_calls.as_mut() {
                    *limit -= 1;
                    if *limit < 0 {
                        return self.error_outcome(
                            format!(
                                "Failed to perform step, max tool calls ({}) reached",
                                self.options.max_tool_calls.unwrap_or(0)
                            ),
                            usage_total,
                            turn,
                        );
                    }
                }

                let (name, mut arguments) = {
                    let call = assistant_message
                        .tool_calls()
                        .find(|c| c.id == call_id)
                        .expect("call id came from this message");
                    (call.name.clone(), call.arguments.clone())
                };

                let result = if let Some(hook) = &self.options.hooks.on_before_tool_call {
                    let outcome = hook(&name, &arguments).await;
                    if self.is_cancelled() {
                        return self.break_outcome(usage_total, turn);
                    }
                    if outcome == HookOutcome::Disallow {
                        Some(ToolResult::error("Tool call is disallowed."))
                    } else {
                        None
                    }
                } else {
                    None
                };

                let result = match result {
                    Some(r) => r,
                    None => {
                        secrets::substitute(&mut arguments, &self.options.secrets);
                        attach_meta(&mut arguments, &name, &intent);

                        let request = ToolCallRequest {
                            name: name.clone(),
                            arguments,
                        };
                        match (self.options.call_tool)(request).await {
                            Ok(r) => r,
                            Err(msg) => {
                                log::warn!("tool \"{}\" failed: {}", name, msg);
                                if let Some(hook) = &self.options.hooks.on_tool_call_error {
                                    hook(&name, &msg).await;
                                }
                                ToolResult::error(format!(
                                    "Error while executing tool \"{}\": {}\n\nPlease try to recover and complete the task.",
                                    name, msg
                                ))
                            }
                        }
                    }
                };

                if self.is_cancelled() {
                    return self.break_outcome(usage_total, turn);
                }

                let mut result = result;
                if let Some(hook) = &self.options.hooks.on_after_tool_call {
                    let outcome = hook(&name, &result).await;
                    if outcome == HookOutcome::Disallow {
                        result = ToolResult::error("Tool result is disallowed to be reported.");
                    }
                }
                if self.is_cancelled() {
                    return self.break_outcome(usage_total, turn);
                }

                if result.is_error() {
                    any_error = true;
                }

                let call_was_done = {
                    let call = assistant_message
                        .tool_calls()
                        .find(|c| c.id == call_id)
                        .expect("call id came from this message");
                    is_done(&call.arguments) && !result.is_error()
                };

                if let Some(call) = assistant_message.tool_calls_mut().find(|c| c.id == call_id) {
                    call.result = Some(result.clone());
                }
                if let Some(last) = conversation.messages.last_mut().and_then(|m| m.as_assistant_mut()) {
                    if let Some(call) = last.tool_calls_mut().find(|c| c.id == call_id) {
                        call.result = Some(result.clone());
                    }
                }

                if call_was_done && done.is_none() {
                    done = Some(result);
                }
            }

            if let Some(result) = done {
                return LoopOutcome {
                    status: LoopStatus::Ok,
                    result: Some(result),
                    error: None,
                    usage: usage_total,
                    turns: turn,
                };
            }

            if let Some(max_retries) = budget.max_tool_call_retries {
                if any_error {
                    if let Some(retries) = budget.tool_call_retries.as_mut() {
                        *retries -= 1;
                        if *retries < 0 {
                            return self.error_outcome(
                                format!(
                                    "Failed to perform action after {} tool call retries",
                                    max_retries
                                ),
                                usage_total,
                                turn,
                            );
                        }
                    }
                } else {
                    budget.tool_call_retries = Some(max_retries);
                }
            }

            turn += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.options
            .abort_controller
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }

    fn error_outcome(&self, message: impl Into<String>, usage: Usage, turns: u32) -> LoopOutcome {
        LoopOutcome {
            status: LoopStatus::Error,
            result: None,
            error: Some(message.into()),
            usage,
            turns,
        }
    }

    fn break_outcome(&self, usage: Usage, turns: u32) -> LoopOutcome {
        LoopOutcome {
            status: LoopStatus::Break,
            result: None,
            error: None,
            usage,
            turns,
        }
    }
}

fn attach_meta(arguments: &mut serde_json::Value, _name: &str, intent: &str) {
    if let Some(obj) = arguments.as_object_mut() {
        obj.insert(
            "_meta".to_string(),
            json!({
                META_INTENT: intent,
                META_HISTORY: true,
                META_STATE: true,
            }),
        );
    }
}

