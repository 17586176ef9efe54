//! Error types for Habit Pulse

use thiserror::Error;

/// Errors surfaced by the analytics engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Referenced habit or user is absent, or not owned by the caller
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write rejected: paused habit or exact-duplicate instant
    #[error("Conflict: {0}")]
    Conflict(String),

    /// End before start, or a context whose end is not after its start
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Malformed time-bucket spec or unresolvable timezone at load time
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable machine-readable code for boundary layers
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::InvalidRange(_) => "INVALID_RANGE",
            EngineError::ConfigError(_) => "CONFIG_ERROR",
            EngineError::Json(_) => "JSON_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
