//! The message-store interface and the streaming seams around it.

use async_trait::async_trait;
use bytes::Bytes;

use ferry_core::{ChatId, Item, ItemId, MediaLocation};

use crate::error::Result;

/// Metadata sent alongside an uploaded payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadMetadata {
    pub file_name: String,
    pub caption: String,
    pub mime_type: Option<String>,
    pub thumbnail: Option<Bytes>,
    /// Duration in seconds, for audio and video.
    pub duration: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub supports_streaming: bool,
}

/// What the store hands back for a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Message number of the new item on the destination.
    pub message_id: ItemId,
    pub bytes: u64,
}

/// Sequential reader consumed by [`MessageStore::upload_stream`].
///
/// `read` returns exactly `size` bytes, or fewer only at end of stream. An
/// empty result means the stream is exhausted.
#[async_trait]
pub trait PayloadReader: Send {
    async fn read(&mut self, size: usize) -> Bytes;

    /// The object size announced when the stream was opened.
    fn declared_size(&self) -> u64;
}

/// Producer side of a streaming transfer.
///
/// Yields consecutive chunks in order; `Ok(None)` marks the end.
#[async_trait]
pub trait ChunkSource: Send + 'static {
    async fn next_chunk(&mut self, chunk_size: usize) -> Result<Option<Bytes>>;
}

/// The remote message store.
///
/// Implementations must be thread-safe (Send + Sync). Every primitive
/// reports failures as a [`crate::TransferFault`].
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Items with `from <= id <= to`, ordered oldest to newest.
    async fn enumerate(&self, source: ChatId, from: ItemId, to: ItemId) -> Result<Vec<Item>>;

    /// Fetch one item again. Media references handed out earlier may have
    /// gone stale; the returned item carries a fresh one.
    async fn resolve(&self, source: ChatId, id: ItemId) -> Result<Option<Item>>;

    /// Download up to `chunk_size` bytes starting at `offset`.
    ///
    /// Returns `Ok(None)` once `offset` reaches the end of the object.
    async fn download_chunk(
        &self,
        location: &MediaLocation,
        offset: u64,
        chunk_size: usize,
    ) -> Result<Option<Bytes>>;

    /// Upload `total_size` bytes read from `reader` in parts of `part_size`.
    async fn upload_stream(
        &self,
        dest: ChatId,
        reader: &mut dyn PayloadReader,
        total_size: u64,
        part_size: usize,
        metadata: UploadMetadata,
    ) -> Result<UploadReceipt>;

    /// Post a text-only message.
    async fn send_text(&self, dest: ChatId, text: &str) -> Result<ItemId>;
}
