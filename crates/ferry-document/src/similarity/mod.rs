//! Locating document pages that look like a reference image.
//!
//! Each page is scored by an ordered chain of [`SimilarityStrategy`]s. The
//! first strategy that accepts decides the match; a strategy that cannot
//! score a pair abstains and the next one is tried. Every page is visited
//! exactly once per request.

mod features;
mod hash;
mod ssim;

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info};

use crate::error::{DocumentError, Result, SimilarityError};
use crate::rasterizer::Rasterizer;

pub use features::FeatureMatch;
pub use hash::{average_hash, PerceptualHash};
pub use ssim::StructuralSimilarity;

/// Which strategy accepted a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchMethod {
    PerceptualHash,
    Structural,
    FeaturePoints,
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchMethod::PerceptualHash => "phash",
            MatchMethod::Structural => "ssim",
            MatchMethod::FeaturePoints => "features",
        })
    }
}

/// One matching page, with the score that got it accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMatch {
    /// 1-indexed.
    pub page: u32,
    pub score: f64,
    pub method: MatchMethod,
}

/// A single way of comparing two images.
pub trait SimilarityStrategy: Send + Sync {
    fn method(&self) -> MatchMethod;

    /// Similarity in `[0, 1]`, or an error meaning "abstain".
    fn score(&self, reference: &DynamicImage, candidate: &DynamicImage)
        -> std::result::Result<f64, SimilarityError>;

    fn accepts(&self, score: f64, threshold: f64) -> bool {
        score >= threshold
    }
}

pub(crate) fn ensure_pixels(image: &DynamicImage) -> std::result::Result<(), SimilarityError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(SimilarityError::TooSmall {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(())
}

/// Runs the strategy chain over every page of a document.
#[derive(Clone)]
pub struct PageSimilarityEngine {
    strategies: Arc<[Box<dyn SimilarityStrategy>]>,
}

impl Default for PageSimilarityEngine {
    /// Perceptual hash, then SSIM, then feature points.
    fn default() -> Self {
        Self::with_strategies(vec![
            Box::new(PerceptualHash),
            Box::new(StructuralSimilarity::default()),
            Box::new(FeatureMatch::default()),
        ])
    }
}

impl fmt::Debug for PageSimilarityEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageSimilarityEngine")
            .field(
                "strategies",
                &self.strategies.iter().map(|s| s.method()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PageSimilarityEngine {
    pub fn with_strategies(strategies: Vec<Box<dyn SimilarityStrategy>>) -> Self {
        Self {
            strategies: strategies.into(),
        }
    }

    /// First accepting strategy for one pair, if any.
    pub fn compare(
        &self,
        reference: &DynamicImage,
        candidate: &DynamicImage,
        threshold: f64,
    ) -> Option<(f64, MatchMethod)> {
        for strategy in self.strategies.iter() {
            match strategy.score(reference, candidate) {
                Ok(score) if strategy.accepts(score, threshold) => {
                    return Some((score, strategy.method()));
                }
                Ok(score) => {
                    debug!(method = %strategy.method(), score, threshold, "not accepted");
                }
                Err(e) => {
                    debug!(method = %strategy.method(), error = %e, "strategy abstained");
                }
            }
        }
        None
    }

    /// Matching pages among already-rendered `pages`, ascending.
    pub fn match_pages(
        &self,
        reference: &DynamicImage,
        pages: &[DynamicImage],
        threshold: f64,
    ) -> Vec<PageMatch> {
        pages
            .iter()
            .zip(1u32..)
            .filter_map(|(image, page)| {
                self.compare(reference, image, threshold)
                    .map(|(score, method)| PageMatch {
                        page,
                        score,
                        method,
                    })
            })
            .collect()
    }

    /// Rasterize `document` and match every page against `reference`.
    ///
    /// Scoring runs on the blocking pool.
    pub async fn find_matching_pages<R: Rasterizer + ?Sized>(
        &self,
        rasterizer: &R,
        document: &[u8],
        reference: &DynamicImage,
        threshold: f64,
        dpi: u32,
    ) -> Result<Vec<PageMatch>> {
        let pages = rasterizer.rasterize(document, dpi).await?;
        let page_count = pages.len();

        let engine = self.clone();
        let reference = reference.clone();
        let matches = tokio::task::spawn_blocking(move || {
            engine.match_pages(&reference, &pages, threshold)
        })
        .await
        .map_err(|e| DocumentError::Worker(e.to_string()))?;

        info!(
            pages = page_count,
            matches = matches.len(),
            threshold,
            "similarity pass finished"
        );
        Ok(matches)
    }
}
