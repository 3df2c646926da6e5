//! # Ferry Testkit
//!
//! Testing utilities for Ferry.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: small PDFs with known page text, synthetic images
//!   (checkerboards, ramps, seeded noise), and [`CollectingSink`]
//! - **Generators**: proptest strategies for page sets, insertion
//!   positions, faults and stream geometry
//!
//! ## Fixtures
//!
//! ```rust
//! use ferry_testkit::fixtures::{checkerboard, numbered_pdf};
//!
//! let pdf = numbered_pdf(6);
//! let cover = checkerboard(200, 100, 10);
//! assert!(pdf.starts_with(b"%PDF"));
//! assert_eq!(cover.width(), 200);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use ferry_testkit::generators::page_set;
//!
//! proptest! {
//!     #[test]
//!     fn removal_accounts_for_every_page(pages in page_set(10)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    checkerboard, gradient, noise_image, numbered_pdf, pattern_bytes, png_bytes, solid, text_pdf,
    CollectingSink,
};
