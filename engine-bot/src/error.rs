//! CLI-level error type, wrapping engine and config failures for display.

use std::path::PathBuf;

/// Top-level error surfaced to `main`'s `ExitCode::FAILURE` path.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("failed to read {path}: {source}")]
    ReadConfig { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    Engine(#[from] engine::EngineError),
}

impl BotError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, BotError>;
