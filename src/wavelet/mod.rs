//! Separable CDF 5/3 wavelet pyramid with per-coefficient fusion weights.
//!
//! The forward transform produces [`DENOISE_LEVELS`] levels of four
//! sub-bands each; reconstruction applies per-level soft-threshold
//! shrinkage and stretches the result into the expanded 14-bit range.

use rayon::prelude::*;

use crate::common::Buffer2;
use crate::math::statistics::median_f32_mut;

/// Number of pyramid levels. Plane dimensions must be multiples of
/// 2^DENOISE_LEVELS.
pub const DENOISE_LEVELS: usize = 6;

/// Internal linear code space the denoised output is stretched into.
pub const EXPANDED_RANGE: f32 = 16384.0;

/// MAD-to-sigma factor for zero-mean Gaussian noise.
pub const MAD_NORMALIZATION: f32 = 0.6745;

// ============================================================================
// Pyramid
// ============================================================================

/// Sub-band indices within a level.
pub const BAND_LL: usize = 0;
pub const BAND_LH: usize = 1;
pub const BAND_HL: usize = 2;
pub const BAND_HH: usize = 3;

/// One pyramid level: four sub-band coefficient planes plus one weight
/// accumulator per sub-band, recording cumulative fusion contribution.
#[derive(Debug, Clone)]
pub struct WaveletLevel {
    pub width: usize,
    pub height: usize,
    pub bands: [Buffer2<f32>; 4],
    pub weights: [Buffer2<f32>; 4],
}

impl WaveletLevel {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bands: std::array::from_fn(|_| Buffer2::new_default(width, height)),
            weights: std::array::from_fn(|_| Buffer2::new_filled(width, height, 1.0)),
        }
    }
}

/// Six-level wavelet decomposition of one CFA plane.
#[derive(Debug, Clone)]
pub struct WaveletPyramid {
    levels: Vec<WaveletLevel>,
    base_width: usize,
    base_height: usize,
}

impl WaveletPyramid {
    /// Allocate an empty pyramid for a plane of the given dimensions.
    pub fn new(width: usize, height: usize) -> Self {
        let t = 1 << DENOISE_LEVELS;
        assert!(
            width % t == 0 && height % t == 0,
            "plane dimensions {width}x{height} must be multiples of {t}"
        );

        let mut levels = Vec::with_capacity(DENOISE_LEVELS);
        let mut w = width;
        let mut h = height;
        for _ in 0..DENOISE_LEVELS {
            w /= 2;
            h /= 2;
            levels.push(WaveletLevel::new(w, h));
        }

        Self {
            levels,
            base_width: width,
            base_height: height,
        }
    }

    pub fn base_width(&self) -> usize {
        self.base_width
    }

    pub fn base_height(&self) -> usize {
        self.base_height
    }

    pub fn levels(&self) -> &[WaveletLevel] {
        &self.levels
    }

    pub fn levels_mut(&mut self) -> &mut [WaveletLevel] {
        &mut self.levels
    }
}

// ============================================================================
// Forward transform
// ============================================================================

/// Convert a u16 plane to f32 for transformation.
pub fn plane_to_f32(plane: &Buffer2<u16>) -> Buffer2<f32> {
    let pixels = plane.pixels().iter().map(|&v| v as f32).collect();
    Buffer2::new(plane.width(), plane.height(), pixels)
}

/// Decompose a plane into the pyramid. Weight accumulators reset to 1.
pub fn forward_transform(plane: &Buffer2<f32>, pyramid: &mut WaveletPyramid) {
    assert_eq!(plane.width(), pyramid.base_width, "plane width mismatch");
    assert_eq!(plane.height(), pyramid.base_height, "plane height mismatch");

    let mut current = plane.clone();
    for level in &mut pyramid.levels {
        let (ll, lh, hl, hh) = forward_level(&current);
        current = ll.clone();
        level.bands = [ll, lh, hl, hh];
        for w in &mut level.weights {
            w.pixels_mut().fill(1.0);
        }
    }
}

/// One analysis level: rows then columns, split into quadrants.
fn forward_level(input: &Buffer2<f32>) -> (Buffer2<f32>, Buffer2<f32>, Buffer2<f32>, Buffer2<f32>) {
    let w = input.width();
    let h = input.height();
    debug_assert!(w % 2 == 0 && h % 2 == 0);

    let rows = lift_rows(input);
    let cols = transpose(&lift_rows(&transpose(&rows)));

    let hw = w / 2;
    let hh = h / 2;

    let mut ll = Buffer2::new_default(hw, hh);
    let mut lh = Buffer2::new_default(hw, hh);
    let mut hl = Buffer2::new_default(hw, hh);
    let mut hh_band = Buffer2::new_default(hw, hh);

    for y in 0..hh {
        for x in 0..hw {
            ll.set(x, y, cols.get(x, y));
            lh.set(x, y, cols.get(hw + x, y));
            hl.set(x, y, cols.get(x, hh + y));
            hh_band.set(x, y, cols.get(hw + x, hh + y));
        }
    }

    (ll, lh, hl, hh_band)
}

/// Apply the 1-D lifting step to every row.
fn lift_rows(input: &Buffer2<f32>) -> Buffer2<f32> {
    let w = input.width();

    let mut output = Buffer2::new_default(w, input.height());
    output
        .pixels_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| lift_1d(input.row(y), row));
    output
}

fn unlift_rows(input: &Buffer2<f32>) -> Buffer2<f32> {
    let w = input.width();

    let mut output = Buffer2::new_default(w, input.height());
    output
        .pixels_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| unlift_1d(input.row(y), row));
    output
}

/// CDF 5/3 analysis lifting with symmetric boundary extension.
/// Low-pass coefficients land in the left half, high-pass in the right.
fn lift_1d(src: &[f32], dst: &mut [f32]) {
    let n = src.len();
    debug_assert!(n % 2 == 0 && n >= 2);
    let half = n / 2;

    for i in 0..half {
        let left = src[2 * i];
        let right = if 2 * i + 2 < n { src[2 * i + 2] } else { left };
        dst[half + i] = src[2 * i + 1] - 0.5 * (left + right);
    }

    for i in 0..half {
        let d_prev = if i > 0 { dst[half + i - 1] } else { dst[half] };
        dst[i] = src[2 * i] + 0.25 * (d_prev + dst[half + i]);
    }
}

/// CDF 5/3 synthesis lifting. Exact inverse of [`lift_1d`].
fn unlift_1d(src: &[f32], dst: &mut [f32]) {
    let n = src.len();
    debug_assert!(n % 2 == 0 && n >= 2);
    let half = n / 2;

    for i in 0..half {
        let d_prev = if i > 0 { src[half + i - 1] } else { src[half] };
        dst[2 * i] = src[i] - 0.25 * (d_prev + src[half + i]);
    }

    for i in 0..half {
        let left = dst[2 * i];
        let right = if 2 * i + 2 < n { dst[2 * i + 2] } else { left };
        dst[2 * i + 1] = src[half + i] + 0.5 * (left + right);
    }
}

fn transpose(input: &Buffer2<f32>) -> Buffer2<f32> {
    let w = input.width();
    let h = input.height();

    let mut output = Buffer2::new_default(h, w);
    output
        .pixels_mut()
        .par_chunks_mut(h)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                *out = input.get(y, x);
            }
        });
    output
}

// ============================================================================
// Inverse transform with shrinkage
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct InverseParams {
    pub black_level: f32,
    pub white_level: f32,
    /// Per-channel noise sigma of a single frame; the shrinkage threshold
    /// scales it by 1/sqrt(frame_count).
    pub noise_sigma: f32,
    pub frame_count: usize,
    /// Shrinkage strength; 0 disables spatial denoising.
    pub spatial_weight: f32,
}

/// Reconstruct the spatial plane, soft-thresholding the detail bands and
/// stretching [black, white] into [0, EXPANDED_RANGE].
pub fn inverse_transform(pyramid: &WaveletPyramid, params: &InverseParams) -> Buffer2<u16> {
    debug_assert!(params.frame_count >= 1);
    let threshold =
        params.spatial_weight * params.noise_sigma / (params.frame_count as f32).sqrt();

    let coarsest = pyramid.levels.last().expect("pyramid has no levels");
    let mut current = normalized_band(coarsest, BAND_LL, 0.0);

    for level in pyramid.levels.iter().rev() {
        let lh = normalized_band(level, BAND_LH, threshold);
        let hl = normalized_band(level, BAND_HL, threshold);
        let hh = normalized_band(level, BAND_HH, threshold);
        current = inverse_level(&current, &lh, &hl, &hh);
    }

    let scale = EXPANDED_RANGE / (params.white_level - params.black_level);
    let black = params.black_level;

    let mut output = Buffer2::new_default(current.width(), current.height());
    output
        .pixels_mut()
        .par_chunks_mut(current.width())
        .enumerate()
        .for_each(|(y, row)| {
            let src = current.row(y);
            for (out, &v) in row.iter_mut().zip(src) {
                let v = (v.max(black) - black) * scale;
                *out = v.clamp(0.0, EXPANDED_RANGE).round() as u16;
            }
        });

    output
}

/// Divide a band by its weight accumulator and apply soft-threshold
/// shrinkage: sign(c) * max(0, |c| - threshold).
fn normalized_band(level: &WaveletLevel, band: usize, threshold: f32) -> Buffer2<f32> {
    let coeffs = &level.bands[band];
    let weights = &level.weights[band];

    let pixels = coeffs
        .pixels()
        .iter()
        .zip(weights.pixels())
        .map(|(&c, &w)| {
            let c = if w > 0.0 { c / w } else { c };
            if threshold > 0.0 {
                c.signum() * (c.abs() - threshold).max(0.0)
            } else {
                c
            }
        })
        .collect();

    Buffer2::new(coeffs.width(), coeffs.height(), pixels)
}

/// One synthesis level: reassemble quadrants, columns then rows.
fn inverse_level(
    ll: &Buffer2<f32>,
    lh: &Buffer2<f32>,
    hl: &Buffer2<f32>,
    hh: &Buffer2<f32>,
) -> Buffer2<f32> {
    let hw = ll.width();
    let hh_dim = ll.height();
    let w = hw * 2;
    let h = hh_dim * 2;

    let mut combined = Buffer2::new_default(w, h);
    for y in 0..hh_dim {
        for x in 0..hw {
            combined.set(x, y, ll.get(x, y));
            combined.set(hw + x, y, lh.get(x, y));
            combined.set(x, hh_dim + y, hl.get(x, y));
            combined.set(hw + x, hh_dim + y, hh.get(x, y));
        }
    }

    let cols = transpose(&unlift_rows(&transpose(&combined)));
    unlift_rows(&cols)
}

// ============================================================================
// Noise estimation
// ============================================================================

/// Estimate the per-channel noise sigma from the finest HH sub-band via
/// the MAD estimator: median(|HH|) / 0.6745.
pub fn estimate_noise(pyramid: &WaveletPyramid) -> f32 {
    let hh = &pyramid.levels[0].bands[BAND_HH];
    let mut magnitudes: Vec<f32> = hh.pixels().iter().map(|v| v.abs()).collect();
    median_f32_mut(&mut magnitudes) / MAD_NORMALIZATION
}
