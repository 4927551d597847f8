//! Histogram-based scene analysis: shadows, blacks, white point, exposure
//! compensation, scene luminance and global noise sigma.

use rayon::prelude::*;
use tracing::debug;

use crate::color::CameraProfile;
use crate::common::Buffer2;
use crate::deinterleave::{deinterleave, DeinterleaveOptions, RawDecoder};
use crate::error::{ProcessError, Result};
use crate::frame::{PostProcessSettings, RawCameraMetadata, RawImageBuffer};
use crate::math::{bilinear_f32, log2};
use crate::postprocess::{create_preview, PreviewImage};

/// All histograms use 255 bins over [0, 256).
const HIST_BINS: usize = 255;

#[inline]
fn bin_of(value: f32) -> usize {
    ((value * HIST_BINS as f32 / 256.0) as usize).min(HIST_BINS - 1)
}

// ============================================================================
// Raw histogram
// ============================================================================

/// Per-channel histogram of the linearized half-resolution image, sampled
/// every `downscale` pixels.
fn calc_histogram(
    buffer: &RawImageBuffer,
    camera: &RawCameraMetadata,
    downscale: usize,
) -> Result<[[u32; HIST_BINS]; 3]> {
    debug_assert!(downscale >= 1);

    let half_width = buffer.width / 2;
    let half_height = buffer.height / 2;
    if half_width == 0 || half_height == 0 {
        return Err(ProcessError::InvalidDimensions {
            width: buffer.width,
            height: buffer.height,
        });
    }

    let guard = buffer.data.lock();
    let decoder = RawDecoder::new(
        &guard,
        buffer.row_stride,
        buffer.pixel_format,
        buffer.width,
        buffer.height,
    )?;

    let (r_idx, [g0_idx, g1_idx], b_idx) = camera.sensor_arrangement.rgb_plane_indices();
    let shading = &buffer.metadata.lens_shading_map;
    let correction = buffer.metadata.color_correction;
    let black = camera.black_level;
    let white_level = camera.white_level;

    let as_shot = buffer.metadata.as_shot;
    let neutral = (as_shot / as_shot.max_element().max(1e-4)).max(glam::Vec3::splat(1e-4));

    let map_sx = (shading[0].width() - 1) as f32 / (half_width.max(2) - 1) as f32;
    let map_sy = (shading[0].height() - 1) as f32 / (half_height.max(2) - 1) as f32;

    let mut histogram = [[0u32; HIST_BINS]; 3];

    let mut hy = 0;
    while hy < half_height {
        let my = hy as f32 * map_sy;
        let mut hx = 0;
        while hx < half_width {
            let mx = hx as f32 * map_sx;

            let channel = |k: usize| -> f32 {
                let raw = decoder.get(2 * hx + k % 2, 2 * hy + k / 2) as f32;
                let lin = ((raw - black[k]) / (white_level - black[k])).clamp(0.0, 1.0);
                lin * correction[k] * bilinear_f32(&shading[k], mx, my)
            };

            let r = (channel(r_idx) / neutral.x).clamp(0.0, 1.0);
            let g = (0.5 * (channel(g0_idx) + channel(g1_idx)) / neutral.y).clamp(0.0, 1.0);
            let b = (channel(b_idx) / neutral.z).clamp(0.0, 1.0);

            histogram[0][bin_of(r * 255.0)] += 1;
            histogram[1][bin_of(g * 255.0)] += 1;
            histogram[2][bin_of(b * 255.0)] += 1;

            hx += downscale;
        }
        hy += downscale;
    }

    Ok(histogram)
}

fn luma_histogram(preview: &PreviewImage) -> [u32; HIST_BINS] {
    let mut histogram = [0u32; HIST_BINS];
    for y in 0..preview.height() {
        for x in 0..preview.width() {
            histogram[bin_of(preview.luma(x, y))] += 1;
        }
    }
    histogram
}

// ============================================================================
// Estimators
// ============================================================================

/// Exposure compensation in stops: distance of the brightest meaningful
/// histogram bin from the top of the range.
pub fn estimate_exposure_compensation(
    buffer: &RawImageBuffer,
    camera: &RawCameraMetadata,
) -> Result<f32> {
    let histogram = calc_histogram(buffer, camera, 1)?;

    let max_pixels = (1e-4 * (buffer.width * buffer.height) as f64 / 4.0) as u32;
    let mut max_bin = 0usize;

    for channel in &histogram {
        let mut sum = 0u32;
        for bin in (0..HIST_BINS).rev() {
            sum += channel[bin];
            if sum > max_pixels {
                max_bin = max_bin.max(bin);
                break;
            }
        }
    }

    Ok(log2(HIST_BINS as f64 / (max_bin + 1) as f64) as f32)
}

/// Sweep the shadow gain until the preview stops brightening.
pub fn estimate_shadows(
    buffer: &RawImageBuffer,
    camera: &RawCameraMetadata,
    settings: &PostProcessSettings,
) -> Result<f32> {
    let mut settings = settings.clone();
    shadows_sweep(|shadows| {
        settings.shadows = shadows;
        Ok(create_preview(buffer, camera, &settings, 8)?.mean_luma())
    })
}

/// Stop rule shared with the tests: walk shadows in {2, 4, ..., 14}, stop
/// once mean luminance grows by less than 3%, back off one step.
fn shadows_sweep(mut measure: impl FnMut(f32) -> Result<f32>) -> Result<f32> {
    let mut previous = 1e-5f32;
    let mut shadows = 2.0f32;

    for step in (2..16).step_by(2) {
        shadows = step as f32;
        let luminance = measure(shadows)?;
        if luminance / previous < 1.03 {
            break;
        }
        previous = luminance;
    }

    Ok((shadows - 2.0).max(2.0))
}

fn estimate_blacks(histogram: &[u32; HIST_BINS], pixel_count: usize) -> f32 {
    // At most 7% of pixels may be crushed, and never above bin 8.
    let allow = (0.07 * pixel_count as f32) as u32;

    let mut end_bin = 8usize;
    let mut pixels = 0u32;
    for (bin, &count) in histogram.iter().enumerate().take(8) {
        if count + pixels > allow {
            end_bin = bin;
            break;
        }
        pixels += count;
    }

    (end_bin as f32 / (HIST_BINS - 1) as f32).max(0.02)
}

fn estimate_white_point(histogram: &[u32; HIST_BINS], pixel_count: usize) -> f32 {
    // At most 0.5% of pixels may clip, and never below bin 192.
    let allow = (0.005 * pixel_count as f32) as u32;

    let mut end_bin = 191usize;
    let mut pixels = 0u32;
    for bin in (192..HIST_BINS).rev() {
        if histogram[bin] + pixels > allow {
            end_bin = bin;
            break;
        }
        pixels += histogram[bin];
    }

    end_bin as f32 / (HIST_BINS - 1) as f32
}

/// Quick estimate: white balance from the as-shot neutral, shadows, blacks
/// and white point from a 1/8-scale preview.
pub fn estimate_basic_settings(
    buffer: &RawImageBuffer,
    camera: &RawCameraMetadata,
) -> Result<PostProcessSettings> {
    let mut settings = PostProcessSettings::default();

    let profile = CameraProfile::new(camera);
    let temperature = profile.temperature_from_vector(buffer.metadata.as_shot)?;
    settings.temperature = temperature.temperature() as f32;
    settings.tint = temperature.tint() as f32;
    settings.shadows = estimate_shadows(buffer, camera, &settings)?;

    let preview = create_preview(buffer, camera, &settings, 8)?;
    let histogram = luma_histogram(&preview);
    let count = preview.width() * preview.height();

    settings.blacks = estimate_blacks(&histogram, count);
    settings.white_point = estimate_white_point(&histogram, count);

    debug!(
        shadows = settings.shadows,
        blacks = settings.blacks,
        white_point = settings.white_point,
        "basic settings"
    );
    Ok(settings)
}

/// Full estimate: basic settings plus exposure compensation, scene
/// luminance and the global noise sigma, from a 1/4-scale preview.
pub fn estimate_settings(
    buffer: &RawImageBuffer,
    camera: &RawCameraMetadata,
) -> Result<PostProcessSettings> {
    let mut settings = PostProcessSettings::default();

    let profile = CameraProfile::new(camera);
    let temperature = profile.temperature_from_vector(buffer.metadata.as_shot)?;
    settings.temperature = temperature.temperature() as f32;
    settings.tint = temperature.tint() as f32;
    settings.exposure = estimate_exposure_compensation(buffer, camera)?;
    settings.shadows = estimate_shadows(buffer, camera, &settings)?;

    let preview = create_preview(buffer, camera, &settings, 4)?;
    let histogram = luma_histogram(&preview);
    let count = preview.width() * preview.height();

    settings.blacks = estimate_blacks(&histogram, count);
    settings.white_point = estimate_white_point(&histogram, count);

    // Geometric mean of luminance.
    let mut log_sum = 0.0f64;
    for y in 0..preview.height() {
        for x in 0..preview.width() {
            log_sum += ((preview.luma(x, y) / 255.0 + 1e-3) as f64).ln();
        }
    }
    settings.scene_luminance = (log_sum / count as f64).exp() as f32;

    let raw = deinterleave(
        buffer,
        camera,
        &DeinterleaveOptions {
            extend_edges: false,
            scale_preview: 1.0,
        },
    )?;
    settings.noise_sigma = estimate_noise_sigma(&raw.planes[0]);

    debug!(
        exposure = settings.exposure,
        scene_luminance = settings.scene_luminance,
        noise_sigma = settings.noise_sigma,
        "full settings"
    );
    Ok(settings)
}

/// Global noise sigma from the absolute response of a 3x3
/// Laplacian-of-Laplacian kernel over one raw plane.
pub fn estimate_noise_sigma(plane: &Buffer2<u16>) -> f32 {
    let w = plane.width();
    let h = plane.height();
    if w < 3 || h < 3 {
        return 0.0;
    }

    #[rustfmt::skip]
    const KERNEL: [[f32; 3]; 3] = [
        [ 1.0, -2.0,  1.0],
        [-2.0,  4.0, -2.0],
        [ 1.0, -2.0,  1.0],
    ];

    let sum: f64 = (1..h - 1)
        .into_par_iter()
        .map(|y| {
            let mut row_sum = 0.0f64;
            for x in 1..w - 1 {
                let mut response = 0.0f32;
                for (ky, kernel_row) in KERNEL.iter().enumerate() {
                    for (kx, &k) in kernel_row.iter().enumerate() {
                        response += k * plane.get(x + kx - 1, y + ky - 1) as f32;
                    }
                }
                row_sum += response.abs() as f64;
            }
            row_sum
        })
        .sum();

    let scale = (0.5 * std::f64::consts::PI).sqrt() / (6.0 * (w - 2) as f64 * (h - 2) as f64);
    (scale * sum) as f32
}

/// Mean absolute Laplacian response of the first raw plane; callers use it
/// to pick the sharpest frame of a burst as the reference.
pub fn measure_sharpness(buffer: &RawImageBuffer, camera: &RawCameraMetadata) -> Result<f32> {
    let raw = deinterleave(
        buffer,
        camera,
        &DeinterleaveOptions {
            extend_edges: false,
            scale_preview: 1.0,
        },
    )?;
    let plane = &raw.planes[0];
    let w = plane.width();
    let h = plane.height();
    if w < 3 || h < 3 {
        return Ok(0.0);
    }

    let sum: f64 = (1..h - 1)
        .into_par_iter()
        .map(|y| {
            let mut row_sum = 0.0f64;
            for x in 1..w - 1 {
                let laplacian = plane.get(x - 1, y) as f32
                    + plane.get(x + 1, y) as f32
                    + plane.get(x, y - 1) as f32
                    + plane.get(x, y + 1) as f32
                    - 4.0 * plane.get(x, y) as f32;
                row_sum += laplacian.abs() as f64;
            }
            row_sum
        })
        .sum();

    Ok((sum / ((w - 2) as f64 * (h - 2) as f64)) as f32)
}
