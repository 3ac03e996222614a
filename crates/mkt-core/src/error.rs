//! Error types for mkt-core

use thiserror::Error;

/// Main error type for mkt-core
#[derive(Error, Debug)]
pub enum Error {
    /// Upstream call failed: transport error, non-2xx status or an
    /// unexpected response shape.
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for failures that originate from the model provider.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Llm(_) | Error::Http(_))
    }
}

/// Result type alias for mkt-core
pub type Result<T> = std::result::Result<T, Error>;
