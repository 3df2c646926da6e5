//! Per-run settings produced by the configuration wizard.
//!
//! Every field is optional; an unset field means "no-op for that concern".
//! The record is immutable for the duration of a run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default acceptance threshold for page similarity matching.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.70;

/// Default skip offset for smart thumbnails, in seconds.
pub const DEFAULT_THUMBNAIL_SKIP_SECONDS: u32 = 10;

/// A literal find/replace rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindReplace {
    pub find: String,
    #[serde(default)]
    pub replace: String,
}

/// Which pages of a PDF to drop. The three selectors are unioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRemoval {
    /// Explicit 1-indexed page numbers.
    #[serde(default)]
    pub pages: Vec<u32>,
    /// Pages whose text contains any of these (case-insensitive).
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Pages that look like this image.
    #[serde(default)]
    pub reference_image: Option<PathBuf>,
    /// Acceptance threshold for image matching. Not clamped.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

impl Default for PageRemoval {
    fn default() -> Self {
        Self {
            pages: Vec::new(),
            keywords: Vec::new(),
            reference_image: None,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl PageRemoval {
    /// Whether any selector is configured.
    pub fn is_configured(&self) -> bool {
        !self.pages.is_empty() || !self.keywords.is_empty() || self.reference_image.is_some()
    }
}

/// Where to put an inserted page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertPosition {
    Start,
    End,
    /// Insert immediately after this many existing pages.
    After(u32),
}

/// An image to add to every PDF as a new page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInsertion {
    pub image: PathBuf,
    pub position: InsertPosition,
}

/// How to pick the thumbnail for video uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbnailMode {
    /// Reuse the thumbnail embedded in the source.
    #[default]
    Original,
    /// Extract a frame at the configured offset.
    Generate,
    /// Pick a representative frame after skipping `skip_seconds`.
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailPolicy {
    pub mode: ThumbnailMode,
    pub skip_seconds: u32,
}

impl Default for ThumbnailPolicy {
    fn default() -> Self {
        Self {
            mode: ThumbnailMode::Original,
            skip_seconds: DEFAULT_THUMBNAIL_SKIP_SECONDS,
        }
    }
}

/// The settings record for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub filename: Option<FindReplace>,
    pub caption: Option<FindReplace>,
    pub extra_caption: Option<String>,
    pub pdf_removal: PageRemoval,
    pub pdf_insertion: Option<PageInsertion>,
    pub thumbnail: ThumbnailPolicy,
}

impl Settings {
    /// Whether PDFs need to be downloaded and edited before upload.
    pub fn edits_documents(&self) -> bool {
        self.pdf_removal.is_configured() || self.pdf_insertion.is_some()
    }

    /// Parse settings handed over by the wizard as JSON.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
