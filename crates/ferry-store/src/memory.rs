//! In-memory implementation of the MessageStore trait.
//!
//! Primarily for testing. Besides holding chats and media objects it can be
//! scripted to fail: expire references, return empty media on resolve,
//! cut downloads short, and inject faults into uploads.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use ferry_core::{ChatId, Item, ItemId, ItemKind, MediaInfo, MediaKind, MediaLocation};

use crate::error::{Result, TransferFault};
use crate::traits::{MessageStore, PayloadReader, UploadMetadata, UploadReceipt};

/// A media payload to seed into the store.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub kind: MediaKind,
    pub data: Bytes,
    pub duration: Option<u32>,
    pub thumbnail: Option<Bytes>,
}

impl NewMedia {
    pub fn document(name: &str, data: Bytes) -> Self {
        let mime = if name.to_ascii_lowercase().ends_with(".pdf") {
            Some("application/pdf".to_string())
        } else {
            None
        };
        Self {
            file_name: Some(name.to_string()),
            mime_type: mime,
            kind: MediaKind::Document,
            data,
            duration: None,
            thumbnail: None,
        }
    }

    pub fn video(name: &str, data: Bytes, thumbnail: Option<Bytes>) -> Self {
        Self {
            file_name: Some(name.to_string()),
            mime_type: Some("video/mp4".to_string()),
            kind: MediaKind::Video,
            data,
            duration: Some(60),
            thumbnail,
        }
    }
}

/// A payload that reached a destination chat.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub dest: ChatId,
    pub message_id: ItemId,
    pub metadata: UploadMetadata,
    pub data: Bytes,
}

/// In-memory message store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Items per chat, ordered by message number.
    chats: HashMap<ChatId, BTreeMap<ItemId, Item>>,

    /// Media payloads by object id.
    objects: HashMap<u64, StoredObject>,
    next_object: u64,

    /// Resolve returns empty media this many more times.
    empty_resolves: HashMap<(ChatId, ItemId), u32>,

    /// Faults popped by successive uploads of a file name.
    upload_faults: HashMap<String, VecDeque<TransferFault>>,
    upload_attempts: HashMap<String, u32>,

    /// Completed uploads, in order.
    uploads: Vec<UploadedFile>,
    texts: Vec<(ChatId, String)>,
    next_message: u64,

    chunk_requests: u64,
}

struct StoredObject {
    data: Bytes,
    generation: u32,
    /// Downloads at or past this offset fail.
    fail_after: Option<u64>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                next_object: 1,
                next_message: 1,
                ..Default::default()
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryStoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryStoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_service(&self, chat: ChatId, id: ItemId) {
        self.insert_item(chat, Item {
            id,
            kind: ItemKind::Service,
        });
    }

    pub fn add_text(&self, chat: ChatId, id: ItemId, text: &str) {
        self.insert_item(chat, Item {
            id,
            kind: ItemKind::Text {
                text: text.to_string(),
            },
        });
    }

    /// Seed a media item and return its current location.
    pub fn add_media(&self, chat: ChatId, id: ItemId, caption: &str, media: NewMedia) -> MediaLocation {
        let mut inner = self.write();
        let object = inner.next_object;
        inner.next_object += 1;

        let location = MediaLocation {
            object,
            generation: 0,
        };
        let info = MediaInfo {
            location,
            file_name: media.file_name,
            mime_type: media.mime_type,
            size: media.data.len() as u64,
            kind: media.kind,
            duration: media.duration,
            width: None,
            height: None,
            supports_streaming: media.kind == MediaKind::Video,
            thumbnail: media.thumbnail,
        };

        inner.objects.insert(
            object,
            StoredObject {
                data: media.data,
                generation: 0,
                fail_after: None,
            },
        );
        inner.chats.entry(chat).or_default().insert(
            id,
            Item {
                id,
                kind: ItemKind::Media {
                    caption: caption.to_string(),
                    media: Some(info),
                },
            },
        );
        location
    }

    fn insert_item(&self, chat: ChatId, item: Item) {
        self.write().chats.entry(chat).or_default().insert(item.id, item);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fault scripting
    // ─────────────────────────────────────────────────────────────────────────

    /// Invalidate every location handed out so far for this item's media.
    pub fn expire_reference(&self, chat: ChatId, id: ItemId) {
        let mut inner = self.write();
        let Some(object) = media_object(&inner, chat, id) else {
            return;
        };
        if let Some(stored) = inner.objects.get_mut(&object) {
            stored.generation += 1;
        }
    }

    /// Make the next `times` resolves of this item return empty media.
    pub fn empty_media_on_resolve(&self, chat: ChatId, id: ItemId, times: u32) {
        self.write().empty_resolves.insert((chat, id), times);
    }

    /// Make downloads of this item's media fail at or past `offset`.
    pub fn fail_downloads_after(&self, chat: ChatId, id: ItemId, offset: u64) {
        let mut inner = self.write();
        let Some(object) = media_object(&inner, chat, id) else {
            return;
        };
        if let Some(stored) = inner.objects.get_mut(&object) {
            stored.fail_after = Some(offset);
        }
    }

    /// Queue a fault for the next upload of `file_name`.
    pub fn fail_upload(&self, file_name: &str, fault: TransferFault) {
        self.write()
            .upload_faults
            .entry(file_name.to_string())
            .or_default()
            .push_back(fault);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn uploads(&self) -> Vec<UploadedFile> {
        self.read().uploads.clone()
    }

    pub fn texts(&self) -> Vec<(ChatId, String)> {
        self.read().texts.clone()
    }

    /// Upload calls made for `file_name`, failed ones included.
    pub fn upload_attempts(&self, file_name: &str) -> u32 {
        self.read()
            .upload_attempts
            .get(file_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn chunk_requests(&self) -> u64 {
        self.read().chunk_requests
    }

    fn next_message_id(&self) -> ItemId {
        let mut inner = self.write();
        let id = ItemId(inner.next_message);
        inner.next_message += 1;
        id
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn media_object(inner: &MemoryStoreInner, chat: ChatId, id: ItemId) -> Option<u64> {
    inner
        .chats
        .get(&chat)?
        .get(&id)?
        .media()
        .map(|m| m.location.object)
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn enumerate(&self, source: ChatId, from: ItemId, to: ItemId) -> Result<Vec<Item>> {
        let inner = self.read();
        let Some(chat) = inner.chats.get(&source) else {
            return Ok(Vec::new());
        };
        Ok(chat.range(from..=to).map(|(_, item)| item.clone()).collect())
    }

    async fn resolve(&self, source: ChatId, id: ItemId) -> Result<Option<Item>> {
        let mut inner = self.write();

        if let Some(remaining) = inner.empty_resolves.get_mut(&(source, id)) {
            if *remaining > 0 {
                *remaining -= 1;
                let caption = inner
                    .chats
                    .get(&source)
                    .and_then(|c| c.get(&id))
                    .map(|item| item.text().to_string())
                    .unwrap_or_default();
                return Ok(Some(Item {
                    id,
                    kind: ItemKind::Media {
                        caption,
                        media: None,
                    },
                }));
            }
        }

        let Some(mut item) = inner.chats.get(&source).and_then(|c| c.get(&id)).cloned() else {
            return Ok(None);
        };

        // Hand out the current generation of the media reference.
        if let ItemKind::Media {
            media: Some(info), ..
        } = &mut item.kind
        {
            if let Some(stored) = inner.objects.get(&info.location.object) {
                info.location.generation = stored.generation;
            }
        }
        Ok(Some(item))
    }

    async fn download_chunk(
        &self,
        location: &MediaLocation,
        offset: u64,
        chunk_size: usize,
    ) -> Result<Option<Bytes>> {
        let mut inner = self.write();
        inner.chunk_requests += 1;

        let stored = inner
            .objects
            .get(&location.object)
            .ok_or_else(|| TransferFault::other(format!("unknown object {}", location.object)))?;

        if stored.generation != location.generation {
            return Err(TransferFault::StaleReference);
        }
        if stored.fail_after.is_some_and(|limit| offset >= limit) {
            return Err(TransferFault::other("connection reset during download"));
        }

        let len = stored.data.len() as u64;
        if offset >= len {
            return Ok(None);
        }
        let start = offset as usize;
        let end = (offset + chunk_size as u64).min(len) as usize;
        Ok(Some(stored.data.slice(start..end)))
    }

    async fn upload_stream(
        &self,
        dest: ChatId,
        reader: &mut dyn PayloadReader,
        total_size: u64,
        part_size: usize,
        metadata: UploadMetadata,
    ) -> Result<UploadReceipt> {
        let fault = {
            let mut inner = self.write();
            *inner
                .upload_attempts
                .entry(metadata.file_name.clone())
                .or_insert(0) += 1;
            inner
                .upload_faults
                .get_mut(&metadata.file_name)
                .and_then(VecDeque::pop_front)
        };

        if let Some(fault) = fault {
            // Fail after the first part, like a real store would mid-upload.
            let _ = reader.read(part_size).await;
            return Err(fault);
        }

        let mut data = BytesMut::with_capacity(total_size as usize);
        loop {
            let part = reader.read(part_size).await;
            if part.is_empty() {
                break;
            }
            data.extend_from_slice(&part);
            if data.len() as u64 >= total_size {
                break;
            }
        }

        if data.len() as u64 != total_size {
            return Err(TransferFault::other(format!(
                "incomplete upload: {}/{} bytes",
                data.len(),
                total_size
            )));
        }

        let message_id = self.next_message_id();
        let bytes = data.len() as u64;
        self.write().uploads.push(UploadedFile {
            dest,
            message_id,
            metadata,
            data: data.freeze(),
        });
        tracing::debug!(dest = %dest, message = %message_id, bytes, "upload stored");

        Ok(UploadReceipt { message_id, bytes })
    }

    async fn send_text(&self, dest: ChatId, text: &str) -> Result<ItemId> {
        let message_id = self.next_message_id();
        self.write().texts.push((dest, text.to_string()));
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecReader {
        data: Bytes,
        size: u64,
    }

    #[async_trait]
    impl PayloadReader for VecReader {
        async fn read(&mut self, size: usize) -> Bytes {
            let take = size.min(self.data.len());
            self.data.split_to(take)
        }

        fn declared_size(&self) -> u64 {
            self.size
        }
    }

    fn reader(data: &'static [u8]) -> VecReader {
        VecReader {
            data: Bytes::from_static(data),
            size: data.len() as u64,
        }
    }

    #[tokio::test]
    async fn test_enumerate_is_inclusive_and_ordered() {
        let store = MemoryStore::new();
        let chat = ChatId(1);
        store.add_text(chat, ItemId(3), "c");
        store.add_text(chat, ItemId(1), "a");
        store.add_service(chat, ItemId(2));
        store.add_text(chat, ItemId(9), "z");

        let items = store.enumerate(chat, ItemId(1), ItemId(3)).await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_expired_reference_needs_resolve() {
        let store = MemoryStore::new();
        let chat = ChatId(1);
        let old = store.add_media(
            chat,
            ItemId(1),
            "",
            NewMedia::document("a.bin", Bytes::from_static(b"payload")),
        );
        store.expire_reference(chat, ItemId(1));

        let result = store.download_chunk(&old, 0, 4).await;
        assert_eq!(result, Err(TransferFault::StaleReference));

        let fresh = store.resolve(chat, ItemId(1)).await.unwrap().unwrap();
        let location = fresh.media().unwrap().location;
        let chunk = store.download_chunk(&location, 0, 4).await.unwrap();
        assert_eq!(chunk.as_deref(), Some(&b"payl"[..]));
    }

    #[tokio::test]
    async fn test_empty_media_on_resolve_is_counted() {
        let store = MemoryStore::new();
        let chat = ChatId(1);
        store.add_media(
            chat,
            ItemId(4),
            "cap",
            NewMedia::document("a.bin", Bytes::from_static(b"x")),
        );
        store.empty_media_on_resolve(chat, ItemId(4), 1);

        let first = store.resolve(chat, ItemId(4)).await.unwrap().unwrap();
        assert!(first.media().is_none());
        assert_eq!(first.text(), "cap");
        let second = store.resolve(chat, ItemId(4)).await.unwrap().unwrap();
        assert!(second.media().is_some());
    }

    #[tokio::test]
    async fn test_upload_records_payload() {
        let store = MemoryStore::new();
        let mut r = reader(b"hello world");
        let metadata = UploadMetadata {
            file_name: "h.txt".into(),
            ..Default::default()
        };

        let receipt = store
            .upload_stream(ChatId(2), &mut r, 11, 4, metadata)
            .await
            .unwrap();
        assert_eq!(receipt.bytes, 11);

        let uploads = store.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(&uploads[0].data[..], b"hello world");
    }

    #[tokio::test]
    async fn test_scripted_upload_fault_pops_once() {
        let store = MemoryStore::new();
        store.fail_upload("f.bin", TransferFault::RateLimited { seconds: 3 });
        let metadata = UploadMetadata {
            file_name: "f.bin".into(),
            ..Default::default()
        };

        let mut r = reader(b"abc");
        let first = store
            .upload_stream(ChatId(2), &mut r, 3, 2, metadata.clone())
            .await;
        assert_eq!(first, Err(TransferFault::RateLimited { seconds: 3 }));

        let mut r = reader(b"abc");
        assert!(store
            .upload_stream(ChatId(2), &mut r, 3, 2, metadata)
            .await
            .is_ok());
        assert_eq!(store.upload_attempts("f.bin"), 2);
    }

    #[tokio::test]
    async fn test_short_payload_rejected() {
        let store = MemoryStore::new();
        let mut r = reader(b"abc");
        let result = store
            .upload_stream(ChatId(2), &mut r, 10, 4, UploadMetadata::default())
            .await;
        assert!(matches!(result, Err(TransferFault::Other { .. })));
        assert!(store.uploads().is_empty());
    }
}
