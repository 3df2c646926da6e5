//! # Ferry Store
//!
//! The message-store collaborator, specified at its interface. Ferry never
//! speaks the remote protocol itself; it drives an implementation of
//! [`MessageStore`].
//!
//! ## Key Types
//!
//! - [`MessageStore`] - enumerate, resolve, download a chunk, upload a stream
//! - [`TransferFault`] - The closed set of faults every primitive can return
//! - [`ChunkSource`] - Where a streaming producer pulls its chunks from
//! - [`PayloadReader`] - What an upload consumes
//! - [`MemoryStore`] - Scriptable in-memory store for tests
//!
//! ## Fault Taxonomy
//!
//! Faults are tagged values, not an exception hierarchy, so the resilience
//! layer can dispatch on them with an exhaustive `match`:
//!
//! - `StaleReference` - the media reference expired; re-resolve and retry
//! - `RateLimited { seconds }` - the store asks us to wait
//! - `ResourceExhausted` - memory pressure; abandon the file
//! - `Other { cause }` - anything else

pub mod error;
pub mod memory;
pub mod source;
pub mod traits;

pub use error::{Result, TransferFault};
pub use memory::{MemoryStore, NewMedia, UploadedFile};
pub use source::{BytesChunkSource, RemoteChunkSource};
pub use traits::{ChunkSource, MessageStore, PayloadReader, UploadMetadata, UploadReceipt};
