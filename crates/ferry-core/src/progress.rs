//! Progress events and the sink they are reported to.
//!
//! Reporting is best-effort: a sink failure is logged by the caller and never
//! fails a transfer.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::stats::TransferSummary;
use crate::types::ItemId;

/// Why an item did not make it to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Retry budget ran out.
    RetriesExhausted { attempts: u32, last_error: String },
    /// Memory or resource exhaustion; not retried.
    ResourceExhausted,
    /// The session halted while this item was in flight.
    CircuitOpen,
}

/// Events emitted while a session runs.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    SessionStarted {
        first: ItemId,
        last: ItemId,
    },
    AttemptStarted {
        item: ItemId,
        file_name: String,
        attempt: u32,
        max_attempts: u32,
    },
    /// Byte progress for the file currently streaming. Rate limited.
    Bytes {
        file_name: String,
        transferred: u64,
        total: u64,
        elapsed: Duration,
        speed_bytes_per_sec: u64,
        eta: Duration,
    },
    DocumentEdited {
        item: ItemId,
        original_pages: u32,
        removed: u32,
        inserted: u32,
    },
    /// Document analysis found nothing to change or failed; the original is
    /// forwarded.
    DocumentUnchanged {
        item: ItemId,
        reason: String,
    },
    Backoff {
        item: ItemId,
        reason: String,
        wait: Duration,
    },
    ItemCompleted {
        item: ItemId,
        file_name: String,
        bytes: u64,
    },
    TextForwarded {
        item: ItemId,
    },
    ItemSkipped {
        item: ItemId,
        reason: SkipReason,
    },
    SessionFinished(TransferSummary),
}

impl ProgressEvent {
    /// Build a byte-progress event with derived speed and ETA.
    pub fn bytes(file_name: &str, transferred: u64, total: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let speed = if secs > 0.0 {
            transferred as f64 / secs
        } else {
            0.0
        };
        let remaining = total.saturating_sub(transferred) as f64;
        let eta = if speed > 0.0 {
            Duration::from_secs_f64(remaining / speed)
        } else {
            Duration::ZERO
        };
        ProgressEvent::Bytes {
            file_name: file_name.to_string(),
            transferred,
            total,
            elapsed,
            speed_bytes_per_sec: speed as u64,
            eta,
        }
    }
}

#[derive(Debug, Error)]
#[error("progress sink error: {0}")]
pub struct ProgressSinkError(pub String);

/// Receiver of progress events (a chat status message, a terminal bar, a log).
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, event: ProgressEvent) -> Result<(), ProgressSinkError>;
}

/// Discards every event.
pub struct NoopSink;

#[async_trait]
impl ProgressSink for NoopSink {
    async fn report(&self, _event: ProgressEvent) -> Result<(), ProgressSinkError> {
        Ok(())
    }
}
