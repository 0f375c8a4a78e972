// Demo: drive the loop scheduler against a canned multi-turn exchange
// without hitting a real provider, using the same scripted-fake pattern
// the integration tests use. Run with:
//   cargo run --example scripted_provider
// For a real provider, use the `lowire-loop-demo` binary instead.

use lowire_loop::providers::{ApiKind, CompletionOptions, CompletionOutcome, Provider};
use lowire_loop::{
    AssistantMessage, ContentPart, Conversation, Loop, LoopOptions, LoopStatus, StopCode,
    StopReason, Tool, ToolCallPart, ToolCallRequest, ToolResult, Usage,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

struct ScriptedProvider {
    script: Mutex<VecDeque<AssistantMessage>>,
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    async fn complete(&self, _conversation: &Conversation, _options: &CompletionOptions) -> CompletionOutcome {
        let mut script = self.script.lock().unwrap();
        let result = script
            .pop_front()
            .unwrap_or_else(|| AssistantMessage::error("script exhausted"));
        CompletionOutcome {
            result,
            usage: Usage { input: 12, output: 6 },
        }
    }
}

#[tokio::main]
async fn main() {
    let call_tool: lowire_loop::ToolCallback = Arc::new(|req: ToolCallRequest| {
        Box::pin(async move { Ok(ToolResult::text(format!("handled {}", req.name))) })
    });

    let tools = vec![Tool {
        name: "report_result".to_string(),
        description: "Report the final result.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        }),
    }];

    let script = vec![AssistantMessage {
        content: vec![ContentPart::ToolCall(ToolCallPart {
            id: "call_1".to_string(),
            name: "report_result".to_string(),
            arguments: json!({ "summary": "2+2 is 4", "_is_done": true }),
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
    }];

    let provider = Arc::new(ScriptedProvider {
        script: Mutex::new(script.into()),
    });

    let options = LoopOptions::new("gpt-5-nano", ApiKind::OpenAiChatCompletions, "sk-demo", call_tool)
        .with_tools(tools)
        .with_max_turns(5);

    let mut agent_loop = Loop::with_provider(provider, options);
    let outcome = agent_loop.run("Summarize what 2+2 is").await;

    match outcome.status {
        LoopStatus::Ok => println!("ok: {:?}", outcome.result.map(|r| r.flattened_text())),
        LoopStatus::Break => println!("cancelled"),
        LoopStatus::Error => println!("error: {:?}", outcome.error),
    }
}
