//! Average-hash fingerprint.

use image::imageops::{self, FilterType};
use image::DynamicImage;

use super::{ensure_pixels, MatchMethod, SimilarityStrategy};
use crate::error::SimilarityError;

const SIDE: u32 = 8;
const BITS: u32 = SIDE * SIDE;

/// 64-bit fingerprint: one bit per cell of an 8×8 grayscale thumbnail, set
/// when the cell is brighter than the mean.
pub fn average_hash(image: &DynamicImage) -> Result<u64, SimilarityError> {
    ensure_pixels(image)?;
    let small = imageops::resize(&image.to_luma8(), SIDE, SIDE, FilterType::Lanczos3);
    let sum: u32 = small.pixels().map(|p| u32::from(p.0[0])).sum();
    let mean = sum / BITS;

    Ok(small
        .pixels()
        .enumerate()
        .filter(|(_, p)| u32::from(p.0[0]) > mean)
        .fold(0u64, |hash, (i, _)| hash | (1 << i)))
}

/// `1 - hamming / 64` over average hashes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerceptualHash;

impl SimilarityStrategy for PerceptualHash {
    fn method(&self) -> MatchMethod {
        MatchMethod::PerceptualHash
    }

    fn score(
        &self,
        reference: &DynamicImage,
        candidate: &DynamicImage,
    ) -> Result<f64, SimilarityError> {
        let distance = (average_hash(reference)? ^ average_hash(candidate)?).count_ones();
        Ok(1.0 - f64::from(distance) / f64::from(BITS))
    }
}
