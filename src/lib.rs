pub mod cache;
pub mod error;
pub mod http;
pub mod logger;
pub mod loop_;
pub mod providers;
pub mod secrets;
pub mod summarize;
pub mod tool_wrap;
pub mod types;

pub use cache::ReplayCache;
pub use error::LoopError;
pub use logger::log;
pub use loop_::{
    Hooks, HookOutcome, Loop, LoopOptions, LoopOutcome, LoopStatus, ToolCallRequest, ToolCallback,
};
pub use providers::ApiKind;
pub use types::*;
