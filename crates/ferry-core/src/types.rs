//! Identifiers and the item model handed out by the message store.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier of a chat (source or destination) on the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message number inside a chat. Ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Opaque reference to a remote media object.
///
/// The `generation` part goes stale on the remote side; a stale location
/// must be re-resolved through the store before it can be downloaded again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaLocation {
    pub object: u64,
    pub generation: u32,
}

/// Broad classification of a media payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Document,
    Video,
    Audio,
    Photo,
}

/// File metadata attached to a media item.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub location: MediaLocation,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: u64,
    pub kind: MediaKind,
    /// Duration in seconds, for audio and video.
    pub duration: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub supports_streaming: bool,
    /// Embedded thumbnail as shipped by the source.
    pub thumbnail: Option<Bytes>,
}

impl MediaInfo {
    /// File name to use on the destination, with a fallback derived from the
    /// media kind when the source carries none.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.file_name {
            return name.clone();
        }
        let ext = match self.kind {
            MediaKind::Document => "bin",
            MediaKind::Video => "mp4",
            MediaKind::Audio => "mp3",
            MediaKind::Photo => "jpg",
        };
        format!("file_{}.{}", self.location.object, ext)
    }

    /// Whether the payload is a paginated document (PDF).
    pub fn is_pdf(&self) -> bool {
        let by_mime = self
            .mime_type
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("application/pdf"));
        let by_name = self
            .file_name
            .as_deref()
            .is_some_and(|n| n.to_ascii_lowercase().ends_with(".pdf"));
        by_mime || by_name
    }

    /// Whether the payload qualifies for video handling (thumbnails,
    /// streaming attributes).
    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
            || self
                .mime_type
                .as_deref()
                .is_some_and(|m| m.starts_with("video/"))
    }
}

/// What an enumerated item carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemKind {
    /// Service entry (joins, pins, title changes). Never transferred.
    Service,
    /// Text-only message.
    Text { text: String },
    /// Media message. `media` is `None` when the remote reference resolved
    /// to an empty payload.
    Media {
        caption: String,
        media: Option<MediaInfo>,
    },
}

/// One entry of a source chat.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
}

impl Item {
    /// Media metadata, if this is a media item with a live payload.
    pub fn media(&self) -> Option<&MediaInfo> {
        match &self.kind {
            ItemKind::Media { media, .. } => media.as_ref(),
            _ => None,
        }
    }

    /// Caption or text body.
    pub fn text(&self) -> &str {
        match &self.kind {
            ItemKind::Service => "",
            ItemKind::Text { text } => text,
            ItemKind::Media { caption, .. } => caption,
        }
    }
}
