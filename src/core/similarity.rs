//! Structural similarity (SSIM) between two decoded images.
//!
//! Both images are reduced to luminance in `[0, 1]`, resampled to a common
//! grid, and compared window by window. Window statistics come from
//! summed-area tables so each window costs O(1) regardless of its size.

use super::error::{DedupError, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsimConfig {
    /// Side length of the square comparison window.
    pub window: u32,
    /// Step between neighbouring windows.
    pub stride: u32,
    pub k1: f64,
    pub k2: f64,
    /// Longest side of the comparison grid; `None` compares at the smaller
    /// image's full size.
    pub max_side: Option<u32>,
}

impl Default for SsimConfig {
    fn default() -> Self {
        Self {
            window: 7,
            stride: 1,
            k1: 0.01,
            k2: 0.03,
            max_side: Some(64),
        }
    }
}

impl SsimConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 || self.stride == 0 {
            return Err(DedupError::config("SSIM window and stride must be at least 1"));
        }
        if self.max_side == Some(0) {
            return Err(DedupError::config("SSIM max_side must be at least 1"));
        }
        if !(self.k1 > 0.0 && self.k2 > 0.0) {
            return Err(DedupError::config("SSIM constants k1 and k2 must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityComparator {
    config: SsimConfig,
}

impl SimilarityComparator {
    pub fn new(config: SsimConfig) -> Self {
        Self { config }
    }

    /// Mean SSIM of `a` against `b`. Symmetric in its arguments.
    pub fn compare(&self, a: &DynamicImage, b: &DynamicImage) -> Result<f64> {
        let (width, height) = self.common_shape(a.dimensions(), b.dimensions())?;
        let x = luminance(a, width, height);
        let y = luminance(b, width, height);
        Ok(self.mean_ssim(&x, &y, width as usize, height as usize))
    }

    /// Grid both images are compared on: the smaller of the two sizes,
    /// shrunk further to `max_side` with the aspect ratio kept.
    pub fn common_shape(&self, left: (u32, u32), right: (u32, u32)) -> Result<(u32, u32)> {
        if left.0 == 0 || left.1 == 0 || right.0 == 0 || right.1 == 0 {
            return Err(DedupError::ShapeMismatch { left, right });
        }

        let mut width = left.0.min(right.0);
        let mut height = left.1.min(right.1);
        if let Some(max_side) = self.config.max_side {
            let longest = width.max(height);
            if longest > max_side {
                let scale = max_side as f64 / longest as f64;
                width = ((width as f64 * scale).round() as u32).clamp(1, max_side);
                height = ((height as f64 * scale).round() as u32).clamp(1, max_side);
            }
        }
        Ok((width, height))
    }

    fn mean_ssim(&self, x: &[f64], y: &[f64], width: usize, height: usize) -> f64 {
        let window = (self.config.window as usize).min(width).min(height);
        let stride = self.config.stride as usize;
        let n = (window * window) as f64;
        // sample (co)variance, as in the reference SSIM formulation
        let cov_norm = if window > 1 { n / (n - 1.0) } else { 1.0 };
        let c1 = self.config.k1 * self.config.k1;
        let c2 = self.config.k2 * self.config.k2;

        let sx = SummedArea::new(width, height, x.iter().copied());
        let sy = SummedArea::new(width, height, y.iter().copied());
        let sxx = SummedArea::new(width, height, x.iter().map(|v| v * v));
        let syy = SummedArea::new(width, height, y.iter().map(|v| v * v));
        let sxy = SummedArea::new(width, height, x.iter().zip(y).map(|(a, b)| a * b));

        let mut total = 0.0;
        let mut count = 0usize;
        for top in (0..=height - window).step_by(stride) {
            for left in (0..=width - window).step_by(stride) {
                let rect = (left, top, left + window, top + window);
                let ux = sx.sum(rect) / n;
                let uy = sy.sum(rect) / n;
                let vx = cov_norm * (sxx.sum(rect) / n - ux * ux);
                let vy = cov_norm * (syy.sum(rect) / n - uy * uy);
                let vxy = cov_norm * (sxy.sum(rect) / n - ux * uy);

                let numerator = (2.0 * ux * uy + c1) * (2.0 * vxy + c2);
                let denominator = (ux * ux + uy * uy + c1) * (vx + vy + c2);
                total += numerator / denominator;
                count += 1;
            }
        }
        total / count as f64
    }
}

fn luminance(image: &DynamicImage, width: u32, height: u32) -> Vec<f64> {
    let gray = image.to_luma8();
    let gray = if gray.dimensions() == (width, height) {
        gray
    } else {
        imageops::resize(&gray, width, height, FilterType::CatmullRom)
    };
    gray.pixels().map(|p| p[0] as f64 / 255.0).collect()
}

/// Summed-area table with a zero row and column in front.
struct SummedArea {
    stride: usize,
    table: Vec<f64>,
}

impl SummedArea {
    fn new(width: usize, height: usize, values: impl Iterator<Item = f64>) -> Self {
        let stride = width + 1;
        let mut table = vec![0.0; stride * (height + 1)];
        let mut values = values;
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += values.next().unwrap_or(0.0);
                table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row;
            }
        }
        Self { stride, table }
    }

    /// Sum over `[x0, x1) x [y0, y1)`.
    fn sum(&self, (x0, y0, x1, y1): (usize, usize, usize, usize)) -> f64 {
        let at = |x: usize, y: usize| self.table[y * self.stride + x];
        at(x1, y1) - at(x0, y1) - at(x1, y0) + at(x0, y0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage};

    fn gray(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| Luma([f(x, y)])))
    }

    fn checker(width: u32, height: u32) -> DynamicImage {
        gray(width, height, |x, y| if (x / 4 + y / 4) % 2 == 0 { 30 } else { 220 })
    }

    fn noise(width: u32, height: u32, seed: u32) -> DynamicImage {
        gray(width, height, |x, y| {
            let mut v = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263) ^ seed;
            v = (v ^ (v >> 13)).wrapping_mul(1_274_126_177);
            (v >> 24) as u8
        })
    }

    #[test]
    fn test_self_similarity_is_one() {
        let cmp = SimilarityComparator::default();
        for img in [checker(64, 64), noise(100, 37, 1), gray(5, 5, |x, y| (x * y) as u8)] {
            let score = cmp.compare(&img, &img).unwrap();
            assert!((score - 1.0).abs() < 1e-9, "score was {}", score);
        }
    }

    #[test]
    fn test_score_is_symmetric() {
        let cmp = SimilarityComparator::default();
        let a = checker(80, 60);
        let b = noise(120, 90, 7);
        let ab = cmp.compare(&a, &b).unwrap();
        let ba = cmp.compare(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn test_unrelated_images_score_low() {
        let cmp = SimilarityComparator::default();
        let score = cmp.compare(&noise(64, 64, 1), &noise(64, 64, 99)).unwrap();
        assert!(score < 0.5, "score was {}", score);

        let black = gray(32, 32, |_, _| 0);
        let white = gray(32, 32, |_, _| 255);
        assert!(cmp.compare(&black, &white).unwrap() < 0.01);
    }

    #[test]
    fn test_resized_copy_scores_high() {
        let cmp = SimilarityComparator::default();
        let small = gray(64, 64, |x, y| (x * 3 + y) as u8);
        let large = DynamicImage::ImageLuma8(imageops::resize(
            &small.to_luma8(),
            128,
            128,
            FilterType::Nearest,
        ));
        assert!(cmp.compare(&small, &large).unwrap() > 0.9);
    }

    #[test]
    fn test_color_and_gray_versions_match() {
        let cmp = SimilarityComparator::default();
        let rgb = RgbImage::from_fn(40, 40, |x, _| image::Rgb([(x * 6) as u8; 3]));
        let color = DynamicImage::ImageRgb8(rgb);
        let grey = DynamicImage::ImageLuma8(color.to_luma8());
        assert!(cmp.compare(&color, &grey).unwrap() > 0.999);
    }

    #[test]
    fn test_common_shape() {
        let cmp = SimilarityComparator::default();
        assert_eq!(cmp.common_shape((50, 40), (30, 60)).unwrap(), (30, 40));
        assert_eq!(cmp.common_shape((640, 480), (1280, 960)).unwrap(), (64, 48));
        assert_eq!(cmp.common_shape((1000, 2), (1000, 2)).unwrap(), (64, 1));

        let unbounded = SimilarityComparator::new(SsimConfig {
            max_side: None,
            ..SsimConfig::default()
        });
        assert_eq!(
            unbounded.common_shape((640, 480), (1280, 960)).unwrap(),
            (640, 480)
        );
    }

    #[test]
    fn test_degenerate_shape_is_rejected() {
        let cmp = SimilarityComparator::default();
        let empty = DynamicImage::new_luma8(0, 0);
        let result = cmp.compare(&empty, &checker(8, 8));
        assert!(matches!(result, Err(DedupError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_summed_area_matches_naive_sum() {
        let values: Vec<f64> = (0..20).map(|v| v as f64).collect();
        let table = SummedArea::new(5, 4, values.iter().copied());
        // rows 1..3, columns 2..5
        let expected: f64 = (1..3)
            .flat_map(|y| (2..5).map(move |x| (y * 5 + x) as f64))
            .sum();
        assert_eq!(table.sum((2, 1, 5, 3)), expected);
    }
}
