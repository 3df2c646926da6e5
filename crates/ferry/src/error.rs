//! Error types for Ferry.

use std::path::PathBuf;

use ferry_core::{CoreError, SessionId};
use ferry_document::DocumentError;
use ferry_store::TransferFault;
use ferry_transfer::StreamError;
use thiserror::Error;

/// Errors that can occur while running a transfer session.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Configuration or settings error.
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    /// Message-store fault outside a retried attempt.
    #[error("store error: {0}")]
    Transfer(#[from] TransferFault),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Document error.
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// Another session is already running.
    #[error("a transfer is already running: {0}")]
    AlreadyRunning(SessionId),

    /// Session not found.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// A configured image could not be loaded.
    #[error("cannot load {path}: {reason}")]
    Asset { path: PathBuf, reason: String },
}

/// Frame extraction failed; callers fall back to the original thumbnail.
#[derive(Debug, Error)]
#[error("frame extraction failed: {0}")]
pub struct ExtractError(pub String);

/// Result type for Ferry operations.
pub type Result<T> = std::result::Result<T, RelayError>;
