use lowire_loop::providers::{ApiKind, CompletionOptions, CompletionOutcome, Provider};
use lowire_loop::{
    AssistantMessage, ContentPart, Conversation, Loop, LoopOptions, LoopStatus, StopCode,
    StopReason, Tool, ToolCallPart, ToolCallRequest, ToolResult, Usage,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct ScriptedProvider {
    script: Mutex<VecDeque<CompletionOutcome>>,
}

impl ScriptedProvider {
    fn new(script: Vec<AssistantMessage>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|result| CompletionOutcome {
                        result,
                        usage: Usage { input: 10, output: 5 },
                    })
                    .collect(),
            ),
        })
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, _conversation: &Conversation, _options: &CompletionOptions) -> CompletionOutcome {
        let mut script = self.script.lock().unwrap();
        script
            .pop_front()
            .unwrap_or_else(|| CompletionOutcome {
                result: AssistantMessage::error("script exhausted"),
                usage: Usage::default(),
            })
    }
}

fn always_succeeding_tool() -> lowire_loop::ToolCallback {
    Arc::new(|req: ToolCallRequest| {
        Box::pin(async move { Ok(ToolResult::text(format!("ok: {}", req.name))) })
    })
}

fn always_erroring_tool() -> lowire_loop::ToolCallback {
    Arc::new(|_req: ToolCallRequest| Box::pin(async move { Ok(ToolResult::error("boom")) }))
}

fn push_tool() -> Tool {
    Tool {
        name: "push".to_string(),
        description: "push a number".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": { "n": { "type": "integer" } },
            "required": ["n"]
        }),
    }
}

fn tool_call_message(id: &str, name: &str, args: serde_json::Value) -> AssistantMessage {
    AssistantMessage {
        content: vec![ContentPart::ToolCall(ToolCallPart {
            id: id.to_string(),
            name: name.to_string(),
            arguments: args,
            result: None,
            openai_id: None,
            openai_status: None,
            google_thought_signature: None,
        })],
        stop_reason: Some(StopReason {
            code: StopCode::Ok,
            message: None,
        }),
        tool_error: None,
        openai_id: None,
        openai_status: None,
    }
}

#[tokio::test]
async fn budget_input_estimate_exceeds_budget() {
    let provider = ScriptedProvider::new(vec![]);
    let options = LoopOptions::new("m", ApiKind::OpenAiChatCompletions, "k", always_succeeding_tool())
        .with_max_tokens(1);
    let mut agent_loop = Loop::with_provider(provider, options);
    let outcome = agent_loop
        .run("This is a test, reply with just \"Hello world\"")
        .await;

    assert_eq!(outcome.status, LoopStatus::Error);
    assert_eq!(outcome.turns, 0);
    let err = outcome.error.unwrap();
    assert!(err.starts_with("Input token estimate"));
    assert!(err.contains("exceeds budget 1"));
}

#[tokio::test]
async fn budget_max_tokens_exhausted_mid_run() {
    let exhausted = AssistantMessage {
        content: vec![],
        stop_reason: Some(StopReason {
            code: StopCode::MaxTokens,
            message: None,
        }),
        tool_error: None,
        openai_id: None,
        openai_status: None,
    };
    let provider = ScriptedProvider::new(vec![exhausted]);
    let options = LoopOptions::new("m", ApiKind::OpenAiChatCompletions, "k", always_succeeding_tool())
        .with_max_tokens(100_000);
    let mut agent_loop = Loop::with_provider(provider, options);
    let outcome = agent_loop.run("do something").await;

    assert_eq!(outcome.status, LoopStatus::Error);
    assert_eq!(outcome.error.as_deref(), Some("Max tokens exhausted"));
}

#[tokio::test]
async fn tool_call_ceiling_is_enforced() {
    let script = (0..5)
        .map(|i| tool_call_message(&format!("call_{}", i), "push", json!({ "n": i })))
        .collect();
    let provider = ScriptedProvider::new(script);
    let options =
        LoopOptions::new("m", ApiKind::OpenAiChatCompletions, "k", always_succeeding_tool())
            .with_tools(vec![push_tool()])
            .with_max_tool_calls(3);
    let mut agent_loop = Loop::with_provider(provider, options);
    let outcome = agent_loop.run("Run numbers 1,2,3,4,5").await;

    assert_eq!(outcome.status, LoopStatus::Error);
    assert_eq!(
        outcome.error.as_deref(),
        Some("Failed to perform step, max tool calls (3) reached")
    );
}

#[tokio::test]
async fn tool_call_retry_ceiling_is_enforced() {
    let script = (0..5)
        .map(|i| tool_call_message(&format!("call_{}", i), "push", json!({ "n": i })))
        .collect();
    let provider = ScriptedProvider::new(script);
    let options =
        LoopOptions::new("m", ApiKind::OpenAiChatCompletions, "k", always_erroring_tool())
            .with_tools(vec![push_tool()])
            .with_max_tool_call_retries(2);
    let mut agent_loop = Loop::with_provider(provider, options);
    let outcome = agent_loop.run("Run numbers 1,2,3,4,5").await;

    assert_eq!(outcome.status, LoopStatus::Error);
    assert_eq!(
        outcome.error.as_deref(),
        Some("Failed to perform action after 2 tool call retries")
    );
}

#[tokio::test]
async fn done_signal_ends_the_run_successfully() {
    let done_message = tool_call_message("call_0", "push", json!({ "n": 1, "_is_done": true }));
    let provider = ScriptedProvider::new(vec![done_message]);
    let options =
        LoopOptions::new("m", ApiKind::OpenAiChatCompletions, "k", always_succeeding_tool())
            .with_tools(vec![push_tool()]);
    let mut agent_loop = Loop::with_provider(provider, options);
    let outcome = agent_loop.run("finish immediately").await;

    assert_eq!(outcome.status, LoopStatus::Ok);
    assert_eq!(outcome.turns, 0);
    assert!(outcome.result.is_some());
}

#[tokio::test]
async fn cancellation_during_before_tool_call_hook_breaks_the_run() {
    let pending = tool_call_message("call_0", "push", json!({ "n": 1 }));
    let provider = ScriptedProvider::new(vec![pending]);
    let token = CancellationToken::new();
    let token_for_hook = token.clone();

    let mut hooks = lowire_loop::Hooks::default();
    hooks.on_before_tool_call = Some(Arc::new(move |_name, _args| {
        let token = token_for_hook.clone();
        Box::pin(async move {
            token.cancel();
            lowire_loop::HookOutcome::Continue
        })
    }));

    let mut options =
        LoopOptions::new("m", ApiKind::OpenAiChatCompletions, "k", always_succeeding_tool())
            .with_tools(vec![push_tool()]);
    options.abort_controller = Some(token);
    options.hooks = hooks;

    let mut agent_loop = Loop::with_provider(provider, options);
    let outcome = agent_loop.run("do it").await;

    assert_eq!(outcome.status, LoopStatus::Break);
}
