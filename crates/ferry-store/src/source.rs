//! Chunk sources: remote objects and in-memory payloads.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use ferry_core::MediaLocation;

use crate::error::Result;
use crate::traits::{ChunkSource, MessageStore};

/// Pulls consecutive chunks of a remote object from a [`MessageStore`].
pub struct RemoteChunkSource<S: MessageStore + ?Sized + 'static> {
    store: Arc<S>,
    location: MediaLocation,
    offset: u64,
    done: bool,
}

impl<S: MessageStore + ?Sized + 'static> RemoteChunkSource<S> {
    pub fn new(store: Arc<S>, location: MediaLocation) -> Self {
        Self {
            store,
            location,
            offset: 0,
            done: false,
        }
    }

    /// Bytes fetched so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

#[async_trait]
impl<S: MessageStore + ?Sized + 'static> ChunkSource for RemoteChunkSource<S> {
    async fn next_chunk(&mut self, chunk_size: usize) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        match self
            .store
            .download_chunk(&self.location, self.offset, chunk_size)
            .await?
        {
            Some(chunk) if !chunk.is_empty() => {
                self.offset += chunk.len() as u64;
                Ok(Some(chunk))
            }
            _ => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Serves an in-memory payload (e.g. an edited document) in chunks.
pub struct BytesChunkSource {
    data: Bytes,
}

impl BytesChunkSource {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }
}

#[async_trait]
impl ChunkSource for BytesChunkSource {
    async fn next_chunk(&mut self, chunk_size: usize) -> Result<Option<Bytes>> {
        if self.data.is_empty() {
            return Ok(None);
        }
        let take = chunk_size.max(1).min(self.data.len());
        Ok(Some(self.data.split_to(take)))
    }
}
