//! Feature-point matching: FAST corners, oriented binary descriptors,
//! cross-checked Hamming matches.
//!
//! Detection runs on a small image pyramid so that scaled copies still
//! match; descriptors are steered by the intensity-centroid angle so that
//! rotated copies do too.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{ensure_pixels, MatchMethod, SimilarityStrategy};
use crate::error::SimilarityError;

/// Bresenham circle of radius 3 used by the FAST test.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

const DESCRIPTOR_BITS: usize = 256;
const PATCH_RADIUS: i32 = 13;
const CENTROID_RADIUS: i32 = 15;
/// Rotated sample points stay within `PATCH_RADIUS * sqrt(2)` of the center.
const BORDER: u32 = 20;
const PATTERN_SEED: u64 = 0x0b5e_55ed;

type Descriptor = [u64; DESCRIPTOR_BITS / 64];

#[derive(Debug, Clone, Copy)]
struct Keypoint {
    x: u32,
    y: u32,
    level: usize,
    score: f32,
}

/// Oriented FAST / rotated BRIEF matcher.
#[derive(Debug, Clone)]
pub struct FeatureMatch {
    pub max_features: usize,
    pub fast_threshold: u8,
    pub levels: usize,
    pub scale_factor: f32,
    /// Longest side of level 0, in pixels.
    pub working_size: u32,
    /// Largest Hamming distance counted as a match.
    pub max_distance: u32,
    pattern: Vec<(i32, i32, i32, i32)>,
}

impl Default for FeatureMatch {
    fn default() -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let pattern = (0..DESCRIPTOR_BITS)
            .map(|_| {
                (
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                    rng.gen_range(-PATCH_RADIUS..=PATCH_RADIUS),
                )
            })
            .collect();
        Self {
            max_features: 500,
            fast_threshold: 20,
            levels: 4,
            scale_factor: 1.3,
            working_size: 640,
            max_distance: 64,
            pattern,
        }
    }
}

impl FeatureMatch {
    fn describe(&self, image: &DynamicImage) -> Vec<Descriptor> {
        let base = image.to_luma8();
        let (w, h) = base.dimensions();
        let longest = w.max(h);
        let base = if longest > self.working_size {
            let s = self.working_size as f32 / longest as f32;
            imageops::resize(
                &base,
                ((w as f32 * s) as u32).max(1),
                ((h as f32 * s) as u32).max(1),
                FilterType::Triangle,
            )
        } else {
            base
        };

        let mut pyramid = vec![base];
        for level in 1..self.levels.max(1) {
            let prev = &pyramid[level - 1];
            let nw = (prev.width() as f32 / self.scale_factor) as u32;
            let nh = (prev.height() as f32 / self.scale_factor) as u32;
            if nw <= 2 * BORDER || nh <= 2 * BORDER {
                break;
            }
            let next = imageops::resize(prev, nw, nh, FilterType::Triangle);
            pyramid.push(next);
        }

        let mut keypoints: Vec<Keypoint> = pyramid
            .iter()
            .enumerate()
            .flat_map(|(level, img)| detect(img, self.fast_threshold, level))
            .collect();
        keypoints.sort_by(|a, b| b.score.total_cmp(&a.score));
        keypoints.truncate(self.max_features);

        let smoothed: Vec<GrayImage> = pyramid.iter().map(|img| imageops::blur(img, 1.2)).collect();
        keypoints
            .iter()
            .map(|kp| {
                let img = &smoothed[kp.level];
                let angle = orientation(img, kp.x, kp.y);
                brief(img, kp.x, kp.y, angle, &self.pattern)
            })
            .collect()
    }
}

impl SimilarityStrategy for FeatureMatch {
    fn method(&self) -> MatchMethod {
        MatchMethod::FeaturePoints
    }

    fn score(
        &self,
        reference: &DynamicImage,
        candidate: &DynamicImage,
    ) -> Result<f64, SimilarityError> {
        ensure_pixels(reference)?;
        ensure_pixels(candidate)?;

        let ours = self.describe(reference);
        if ours.is_empty() {
            return Err(SimilarityError::NoFeatures("reference"));
        }
        let theirs = self.describe(candidate);
        if theirs.is_empty() {
            return Err(SimilarityError::NoFeatures("candidate"));
        }

        let matched = cross_checked_matches(&ours, &theirs, self.max_distance);
        Ok(matched as f64 / ours.len().max(theirs.len()) as f64)
    }

    /// The fallback for rotated or cropped screenshots gets a looser bar.
    fn accepts(&self, score: f64, threshold: f64) -> bool {
        score >= threshold * 0.5
    }
}

/// FAST-9 corners with 3×3 non-maximum suppression.
fn detect(img: &GrayImage, threshold: u8, level: usize) -> Vec<Keypoint> {
    let (w, h) = img.dimensions();
    if w <= 2 * BORDER || h <= 2 * BORDER {
        return Vec::new();
    }

    let mut scores = vec![0f32; (w * h) as usize];
    for y in BORDER..h - BORDER {
        for x in BORDER..w - BORDER {
            scores[(y * w + x) as usize] = corner_score(img, x, y, i32::from(threshold));
        }
    }

    let mut out = Vec::new();
    for y in BORDER..h - BORDER {
        for x in BORDER..w - BORDER {
            let s = scores[(y * w + x) as usize];
            if s <= 0.0 {
                continue;
            }
            let is_max = (-1i32..=1).all(|dy| {
                (-1i32..=1).all(|dx| {
                    let nx = (x as i32 + dx) as u32;
                    let ny = (y as i32 + dy) as u32;
                    scores[(ny * w + nx) as usize] <= s
                })
            });
            if is_max {
                out.push(Keypoint {
                    x,
                    y,
                    level,
                    score: s,
                });
            }
        }
    }
    out
}

/// Zero unless nine contiguous circle pixels are all brighter or all darker
/// than the center by more than `t`.
fn corner_score(img: &GrayImage, x: u32, y: u32, t: i32) -> f32 {
    let center = i32::from(img.get_pixel(x, y).0[0]);
    let mut bright = 0u16;
    let mut dark = 0u16;
    let mut bright_sum = 0;
    let mut dark_sum = 0;

    for (i, (dx, dy)) in CIRCLE.iter().enumerate() {
        let p = i32::from(img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32).0[0]);
        if p > center + t {
            bright |= 1 << i;
            bright_sum += p - center - t;
        } else if p < center - t {
            dark |= 1 << i;
            dark_sum += center - p - t;
        }
    }

    if has_arc(bright, 9) {
        bright_sum as f32
    } else if has_arc(dark, 9) {
        dark_sum as f32
    } else {
        0.0
    }
}

/// Whether `mask` has `n` consecutive set bits, wrapping around 16.
fn has_arc(mask: u16, n: u32) -> bool {
    if mask == 0 {
        return false;
    }
    let doubled = u32::from(mask) | (u32::from(mask) << 16);
    let mut run = 0;
    for i in 0..32 {
        if doubled >> i & 1 == 1 {
            run += 1;
            if run >= n {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Intensity-centroid angle of the disc around `(x, y)`.
fn orientation(img: &GrayImage, x: u32, y: u32) -> f32 {
    let (mut m01, mut m10) = (0f32, 0f32);
    for dy in -CENTROID_RADIUS..=CENTROID_RADIUS {
        for dx in -CENTROID_RADIUS..=CENTROID_RADIUS {
            if dx * dx + dy * dy > CENTROID_RADIUS * CENTROID_RADIUS {
                continue;
            }
            let p = f32::from(img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32).0[0]);
            m10 += dx as f32 * p;
            m01 += dy as f32 * p;
        }
    }
    m01.atan2(m10)
}

/// Steered binary descriptor.
fn brief(
    img: &GrayImage,
    x: u32,
    y: u32,
    angle: f32,
    pattern: &[(i32, i32, i32, i32)],
) -> Descriptor {
    let (sin, cos) = angle.sin_cos();
    let sample = |px: i32, py: i32| {
        let rx = (cos * px as f32 - sin * py as f32).round() as i32;
        let ry = (sin * px as f32 + cos * py as f32).round() as i32;
        img.get_pixel((x as i32 + rx) as u32, (y as i32 + ry) as u32).0[0]
    };

    let mut descriptor = [0u64; DESCRIPTOR_BITS / 64];
    for (bit, &(ax, ay, bx, by)) in pattern.iter().enumerate() {
        if sample(ax, ay) < sample(bx, by) {
            descriptor[bit / 64] |= 1 << (bit % 64);
        }
    }
    descriptor
}

fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

fn nearest(query: &Descriptor, pool: &[Descriptor]) -> Option<(usize, u32)> {
    pool.iter()
        .enumerate()
        .map(|(i, d)| (i, hamming(query, d)))
        .min_by_key(|&(_, dist)| dist)
}

/// Matches that are each other's nearest neighbour within `max_distance`.
fn cross_checked_matches(a: &[Descriptor], b: &[Descriptor], max_distance: u32) -> usize {
    a.iter()
        .enumerate()
        .filter(|(i, da)| match nearest(da, b) {
            Some((j, dist)) if dist <= max_distance => {
                nearest(&b[j], a).map(|(back, _)| back) == Some(*i)
            }
            _ => false,
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_testkit::fixtures::{noise_image, solid};

    #[test]
    fn test_has_arc_wraps() {
        assert!(has_arc(0b1111_1111_1000_0000, 9));
        // Five at the top, four at the bottom.
        assert!(has_arc(0b1111_1000_0000_1111, 9));
        assert!(!has_arc(0b0111_1111_0111_1111, 9));
        assert!(!has_arc(0, 9));
    }

    #[test]
    fn test_self_match_is_near_total() {
        let image = noise_image(200, 160, 11);
        let score = FeatureMatch::default().score(&image, &image).unwrap();
        assert!(score >= 0.9, "score {score}");
    }

    #[test]
    fn test_unrelated_noise_matches_poorly() {
        let a = noise_image(200, 160, 3);
        let b = noise_image(200, 160, 4);
        let score = FeatureMatch::default().score(&a, &b).unwrap();
        assert!(score < 0.2, "score {score}");
    }

    #[test]
    fn test_flat_image_abstains() {
        let flat = solid(200, 160, 90);
        let result = FeatureMatch::default().score(&flat, &flat);
        assert!(matches!(result, Err(SimilarityError::NoFeatures(_))));
    }

    #[test]
    fn test_looser_acceptance_bar() {
        let matcher = FeatureMatch::default();
        assert!(matcher.accepts(0.36, 0.70));
        assert!(!matcher.accepts(0.34, 0.70));
    }
}
