//! The fault taxonomy shared by every message-store primitive.

use thiserror::Error;

/// Faults returned by message-store primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferFault {
    /// The remote media reference expired, or the item resolved to an
    /// empty payload.
    #[error("media reference expired")]
    StaleReference,

    /// The remote store asked us to back off.
    #[error("rate limited: retry after {seconds}s")]
    RateLimited { seconds: u64 },

    /// Memory or resource exhaustion.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Anything else.
    #[error("{cause}")]
    Other { cause: String },
}

impl TransferFault {
    pub fn other(cause: impl Into<String>) -> Self {
        TransferFault::Other {
            cause: cause.into(),
        }
    }

    /// Short label used in logs and progress events.
    pub fn label(&self) -> &'static str {
        match self {
            TransferFault::StaleReference => "stale-reference",
            TransferFault::RateLimited { .. } => "rate-limited",
            TransferFault::ResourceExhausted(_) => "resource-exhausted",
            TransferFault::Other { .. } => "error",
        }
    }
}

/// Result type for message-store operations.
pub type Result<T> = std::result::Result<T, TransferFault>;
