//! Error types for the transfer module.

use ferry_store::TransferFault;
use thiserror::Error;

/// Errors surfaced by stream helpers that need the whole payload.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The producer stopped before the declared size was reached.
    #[error("incomplete stream: received {received} of {declared} bytes")]
    Incomplete {
        received: u64,
        declared: u64,
        fault: Option<TransferFault>,
    },

    /// The stream was already closed.
    #[error("stream closed")]
    Closed,
}

impl StreamError {
    /// The underlying store fault, or a generic one for a short stream.
    pub fn into_fault(self) -> TransferFault {
        match self {
            StreamError::Incomplete {
                fault: Some(fault), ..
            } => fault,
            other => TransferFault::other(other.to_string()),
        }
    }
}

/// Result type for stream helpers.
pub type Result<T> = std::result::Result<T, StreamError>;
