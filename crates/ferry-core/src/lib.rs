//! # Ferry Core
//!
//! Pure types shared by every Ferry crate: message-store item models,
//! per-run settings, configuration profiles, progress events and
//! page-set parsing.
//!
//! This crate contains no I/O, no networking, no process spawning.
//!
//! ## Key Types
//!
//! - [`Item`] - One entry of a source chat, as enumerated by the message store
//! - [`Settings`] - Immutable per-run bag of optional edits
//! - [`RelayConfig`] - Tunable knobs, grouped into deployment [`Profile`]s
//! - [`ProgressEvent`] / [`ProgressSink`] - The best-effort progress surface
//! - [`TransferStats`] / [`TransferSummary`] - Session counters
//!
//! ## Page Sets
//!
//! Page numbers are always 1-indexed. See [`pages::parse_page_range`].

pub mod config;
pub mod edits;
pub mod error;
pub mod pages;
pub mod progress;
pub mod settings;
pub mod stats;
pub mod types;

pub use config::{ConfigOverrides, Pacing, Profile, RelayConfig};
pub use edits::{apply_caption_edits, apply_filename_edit};
pub use error::{CoreError, Result};
pub use pages::{parse_page_range, PageSet};
pub use progress::{NoopSink, ProgressEvent, ProgressSink, ProgressSinkError, SkipReason};
pub use settings::{
    FindReplace, InsertPosition, PageInsertion, PageRemoval, Settings, ThumbnailMode,
    ThumbnailPolicy, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_THUMBNAIL_SKIP_SECONDS,
};
pub use stats::{HaltReason, TransferStats, TransferSummary};
pub use types::{ChatId, Item, ItemId, ItemKind, MediaInfo, MediaKind, MediaLocation, SessionId};
