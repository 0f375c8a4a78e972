//! Typed errors for fallible boundaries below the scheduler.
//!
//! The scheduler's own public contract (`Loop::run`) never surfaces these
//! directly — `run()` always returns a fixed-text `status:error` envelope.
//! `LoopError` exists for collaborators that construct a `Loop` or save a
//! cache file outside of `run`.

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("cache I/O error: {0}")]
    CacheIo(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}
