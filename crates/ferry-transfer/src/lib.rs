//! # Ferry Transfer
//!
//! Moves one payload from a chunk source into an uploader without holding
//! the whole object in memory, and decides what to do when that fails.
//!
//! ## Overview
//!
//! - [`ChunkedTransferStream`] runs a background producer that pulls fixed
//!   size chunks into a bounded queue; the consumer side is a sequential
//!   [`ferry_store::PayloadReader`]. Memory is bounded by
//!   `chunk_size × queue_capacity`.
//! - [`TransferResilienceController`] wraps one file's attempt loop: retry
//!   budget, fault classification, backoff, and the process-wide
//!   [`CircuitBreaker`].
//!
//! ## Data Flow
//!
//! ```text
//!  MessageStore ──download_chunk──> producer task ──mpsc(capacity)──> read(size)
//!                                        │                               │
//!                                  pause every N chunks          progress (throttled)
//!                                                                        │
//!                                                                upload_stream
//! ```

pub mod error;
pub mod progress;
pub mod resilience;
pub mod stream;

pub use error::{Result, StreamError};
pub use progress::ProgressThrottle;
pub use resilience::{
    decide, Attempt, CircuitBreaker, FileOutcome, RetryDecision, RetryPolicy, RetryState,
    TransferResilienceController,
};
pub use stream::{ChunkedTransferStream, ProducerOutcome, StreamOptions};
