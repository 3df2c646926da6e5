//! # Ferry Document
//!
//! Everything Ferry does to a PDF in flight: deciding which pages to drop
//! and producing the edited document.
//!
//! ## Overview
//!
//! Page selection has three sources, combined by the caller:
//!
//! - explicit page numbers ([`ferry_core::parse_page_range`]),
//! - keyword search over extracted page text ([`find_pages_with_keywords`]),
//! - similarity to a reference image ([`PageSimilarityEngine`]), which needs
//!   the pages rendered by a [`Rasterizer`].
//!
//! [`DocumentMutator`] then removes the selected pages and optionally adds
//! one image page.
//!
//! ## Key Types
//!
//! - [`DocumentMutator`] - Page removal and image-page insertion
//! - [`PageSimilarityEngine`] - Ordered strategy chain per page
//! - [`SimilarityStrategy`] - Perceptual hash, SSIM, feature points
//! - [`Rasterizer`] / [`PdftoppmRasterizer`] - Pages to images
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ferry_core::{InsertPosition, PageSet};
//! use ferry_document::DocumentMutator;
//!
//! fn example(pdf: &[u8], cover: &image::DynamicImage) -> ferry_document::Result<()> {
//!     let mutator = DocumentMutator::default();
//!     let trimmed = mutator.remove_pages(pdf, &PageSet::from([2, 5]))?;
//!     let with_cover = mutator.insert_image_page(&trimmed.document, cover, InsertPosition::Start)?;
//!     assert_eq!(with_cover.total_pages, trimmed.kept + 1);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod keywords;
pub mod mutator;
pub mod rasterizer;
pub mod similarity;

pub use error::{DocumentError, Result, SimilarityError};
pub use keywords::find_pages_with_keywords;
pub use mutator::{page_count, DocumentMutator, InsertionReport, PageFormat, RemovalReport, A4};
pub use rasterizer::{PdftoppmRasterizer, Rasterizer};
pub use similarity::{
    average_hash, FeatureMatch, MatchMethod, PageMatch, PageSimilarityEngine, PerceptualHash,
    SimilarityStrategy, StructuralSimilarity,
};
