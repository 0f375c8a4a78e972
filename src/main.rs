use clap::Parser;
use lowire_loop::{ApiKind, Loop, LoopOptions, LoopStatus, Tool, ToolCallRequest, ToolResult};
use serde_json::json;
use std::sync::Arc;

/// Minimal demo driver for the agent loop runtime. Wires together
/// environment configuration and a single echo tool; real tool
/// implementations and MCP wiring are a caller concern.
#[derive(Parser)]
#[command(name = "lowire-loop-demo")]
#[command(author, version, about = "Demo runner for the agent loop runtime", long_about = None)]
struct Cli {
    /// The task to hand to the model
    #[arg(short, long)]
    task: String,

    /// Model name
    #[arg(short, long, default_value = "gpt-5-nano")]
    model: String,

    /// Which API to target
    #[arg(long, value_enum, default_value = "openai-chat")]
    api: ApiChoice,

    #[arg(long, default_value_t = 20)]
    max_turns: u32,
}

#[derive(Clone, clap::ValueEnum)]
enum ApiChoice {
    OpenaiChat,
    OpenaiResponses,
    Anthropic,
    Google,
}

fn main() {
    let cli = Cli::parse();

    let api = match cli.api {
        ApiChoice::OpenaiChat => ApiKind::OpenAiChatCompletions,
        ApiChoice::OpenaiResponses => ApiKind::OpenAiResponses,
        ApiChoice::Anthropic => ApiKind::Anthropic,
        ApiChoice::Google => ApiKind::Google,
    };

    let call_tool: lowire_loop::ToolCallback = Arc::new(|req: ToolCallRequest| {
        Box::pin(async move {
            lowire_loop::log(format!("demo tool invoked: {}", req.name));
            Ok(ToolResult::text(format!("echo: {}", req.arguments)))
        })
    });

    let tools = vec![Tool {
        name: "echo".to_string(),
        description: "Echoes its input back to the caller.".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        }),
    }];

    let options = LoopOptions::from_env(cli.model, api, call_tool)
        .unwrap_or_else(|err| panic!("{}", err))
        .with_tools(tools)
        .with_max_turns(cli.max_turns);

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let outcome = runtime.block_on(async {
        let mut agent_loop = Loop::new(options);
        agent_loop.run(&cli.task).await
    });

    match outcome.status {
        LoopStatus::Ok => {
            println!("done after {} turns", outcome.turns);
            if let Some(result) = outcome.result {
                println!("{}", result.flattened_text());
            }
        }
        LoopStatus::Break => println!("cancelled after {} turns", outcome.turns),
        LoopStatus::Error => {
            eprintln!("error: {}", outcome.error.unwrap_or_default());
            std::process::exit(1);
        }
    }
}
