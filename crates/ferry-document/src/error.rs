//! Error types for document handling.

use thiserror::Error;

/// Errors from reading, editing or rasterizing a document.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The input is not a structurally valid PDF.
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// Serializing the edited document failed.
    #[error("writing pdf: {0}")]
    Io(#[from] std::io::Error),

    /// The page tree does not have the shape we expect.
    #[error("malformed page tree: {0}")]
    PageTree(String),

    /// The image to insert could not be decoded or re-encoded.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// The external rasterizer failed.
    #[error("rasterizer failed: {0}")]
    Rasterize(String),

    #[error("similarity worker failed: {0}")]
    Worker(String),
}

/// A single similarity strategy could not score a pair of images.
///
/// Treated as "this method abstains" by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("image too small: {width}x{height}")]
    TooSmall { width: u32, height: u32 },

    #[error("no features detected in {0} image")]
    NoFeatures(&'static str),
}

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, DocumentError>;
