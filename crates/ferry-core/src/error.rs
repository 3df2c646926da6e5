//! Error types for Ferry Core.

use thiserror::Error;

/// Errors produced by the pure core helpers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid page range '{input}': {reason}")]
    InvalidPageRange { input: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
