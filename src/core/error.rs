//! Core error definitions.
//!
//! One taxonomy for the whole engine: validation and not-found outcomes are
//! definite and non-retryable; derivation failures are per-request and never
//! poison the cache; storage errors are fatal to the in-flight call.

use thiserror::Error;

/// Core engine error types
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Derivation failed: {0}")]
    Derivation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;
