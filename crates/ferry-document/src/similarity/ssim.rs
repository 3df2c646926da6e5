//! Windowed structural similarity on a common grayscale canvas.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};

use super::{ensure_pixels, MatchMethod, SimilarityStrategy};
use crate::error::SimilarityError;

const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Mean SSIM over square windows, clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct StructuralSimilarity {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub window: u32,
    pub step: u32,
}

impl Default for StructuralSimilarity {
    fn default() -> Self {
        Self {
            canvas_width: 800,
            canvas_height: 600,
            window: 8,
            step: 4,
        }
    }
}

impl StructuralSimilarity {
    fn canvas(&self, image: &DynamicImage) -> GrayImage {
        imageops::resize(
            &image.to_luma8(),
            self.canvas_width,
            self.canvas_height,
            FilterType::Triangle,
        )
    }

    fn mean_ssim(&self, a: &GrayImage, b: &GrayImage) -> Result<f64, SimilarityError> {
        let (w, h) = a.dimensions();
        let win = self.window.max(2);
        let step = self.step.max(1);
        if w < win || h < win {
            return Err(SimilarityError::TooSmall {
                width: w,
                height: h,
            });
        }

        let n = f64::from(win * win);
        let mut total = 0.0;
        let mut windows = 0u32;

        let mut y = 0;
        while y + win <= h {
            let mut x = 0;
            while x + win <= w {
                let (mut sa, mut sb, mut saa, mut sbb, mut sab) = (0.0, 0.0, 0.0, 0.0, 0.0);
                for dy in 0..win {
                    for dx in 0..win {
                        let pa = f64::from(a.get_pixel(x + dx, y + dy).0[0]);
                        let pb = f64::from(b.get_pixel(x + dx, y + dy).0[0]);
                        sa += pa;
                        sb += pb;
                        saa += pa * pa;
                        sbb += pb * pb;
                        sab += pa * pb;
                    }
                }
                let (ma, mb) = (sa / n, sb / n);
                let va = saa / n - ma * ma;
                let vb = sbb / n - mb * mb;
                let cov = sab / n - ma * mb;

                total += ((2.0 * ma * mb + C1) * (2.0 * cov + C2))
                    / ((ma * ma + mb * mb + C1) * (va + vb + C2));
                windows += 1;
                x += step;
            }
            y += step;
        }

        Ok((total / f64::from(windows)).clamp(0.0, 1.0))
    }
}

impl SimilarityStrategy for StructuralSimilarity {
    fn method(&self) -> MatchMethod {
        MatchMethod::Structural
    }

    fn score(
        &self,
        reference: &DynamicImage,
        candidate: &DynamicImage,
    ) -> Result<f64, SimilarityError> {
        ensure_pixels(reference)?;
        ensure_pixels(candidate)?;
        self.mean_ssim(&self.canvas(reference), &self.canvas(candidate))
    }
}
