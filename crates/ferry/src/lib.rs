//! # Ferry
//!
//! Relay media between message stores, editing documents in flight.
//!
//! ## Overview
//!
//! Ferry copies a range of items from a source chat to a destination chat:
//!
//! - **Streaming**: each file is downloaded in chunks and re-uploaded at the
//!   same time, through a bounded queue, so memory stays flat
//! - **Resilience**: stale references, rate limits and memory pressure are
//!   classified and retried, skipped or waited out; a run of consecutive
//!   faults halts the session
//! - **Document edits**: PDF pages are dropped by number, keyword or
//!   similarity to a reference image, and an image page can be added
//! - **Thumbnails**: videos keep their thumbnail or get a fresh frame
//!
//! ## Key Types
//!
//! - [`SessionManager`] - Sessions, the single running transfer, stop flag
//! - [`TransferOrchestrator`] - The per-session loop
//! - [`FrameExtractor`] / [`FfmpegFrameExtractor`] - Video frames
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ferry::core::{ChatId, ItemId, NoopSink, RelayConfig};
//! use ferry::document::PdftoppmRasterizer;
//! use ferry::store::MemoryStore;
//! use ferry::{FfmpegFrameExtractor, SessionManager, TransferOrchestrator};
//!
//! async fn example() -> ferry::Result<()> {
//!     let config = RelayConfig::default();
//!     let sessions = Arc::new(SessionManager::new(
//!         config.circuit_breaker_threshold,
//!         Duration::from_secs(600),
//!     ));
//!     let orchestrator = TransferOrchestrator::new(
//!         Arc::new(MemoryStore::new()),
//!         config,
//!         Arc::clone(&sessions),
//!         PdftoppmRasterizer::default(),
//!         FfmpegFrameExtractor::default(),
//!         Arc::new(NoopSink),
//!     );
//!
//!     let session = sessions.create(ChatId(-100), ChatId(-200));
//!     let summary = orchestrator.run(session, ItemId(1), ItemId(50)).await?;
//!     println!("{} files, {} skipped", summary.processed, summary.skipped);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `ferry::core` - Items, settings, configuration, progress events
//! - `ferry::store` - The message-store interface and the in-memory store
//! - `ferry::transfer` - Chunked stream and resilience controller
//! - `ferry::document` - Page selection and document edits

pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod session;
pub mod thumbnail;

// Re-export component crates
pub use ferry_core as core;
pub use ferry_document as document;
pub use ferry_store as store;
pub use ferry_transfer as transfer;

pub use error::{ExtractError, RelayError, Result};
pub use orchestrator::TransferOrchestrator;
pub use session::{RunGuard, SessionManager, SessionStep, TransferSession};
pub use thumbnail::{acquire_thumbnail, FfmpegFrameExtractor, FrameExtractor};

pub use ferry_core::{
    HaltReason, ItemId, ProgressEvent, ProgressSink, RelayConfig, Settings, TransferSummary,
};
