//! Pixel pipeline from denoised 4-plane linear Bayer to display-referred
//! sRGB: lens shading, white balance, color matrix, local tonemap,
//! chroma-aware smoothing and multi-scale sharpening.

mod preview;

pub use preview::{create_preview, PreviewImage};

use glam::{Mat3, Vec3};
use rayon::prelude::*;
use tracing::info;

use crate::color::{create_srgb_matrix, Temperature, WhiteBalance};
use crate::common::Buffer2;
use crate::error::{ProcessError, Result};
use crate::frame::{PostProcessSettings, RawCameraMetadata, RawImageMetadata};
use crate::math::bilinear_f32;
use crate::wavelet::EXPANDED_RANGE;

const LUMA_R: f32 = 0.2126;
const LUMA_G: f32 = 0.7152;
const LUMA_B: f32 = 0.0722;

// ============================================================================
// Tone curve
// ============================================================================

/// Global tone operator: variance-weighted shadow lift, range compression,
/// black/white-point remap and contrast about mid-gray.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ToneCurve {
    shadows: f32,
    blacks: f32,
    white_point: f32,
    variance: f32,
    contrast: f32,
}

impl ToneCurve {
    pub(crate) fn from_settings(settings: &PostProcessSettings) -> Self {
        Self {
            shadows: settings.shadows,
            blacks: settings.blacks,
            white_point: settings.white_point,
            variance: settings.tonemap_variance.max(1e-4),
            contrast: settings.contrast,
        }
    }

    /// Map linear scene luminance into display range. Monotone in `y`.
    #[inline]
    pub(crate) fn apply(&self, y: f32) -> f32 {
        // Shadow lift, strongest where the scene is dark.
        let gain = 1.0 + (self.shadows - 1.0) * self.variance / (self.variance + y);
        let y = y * gain;

        // Range compression.
        let y = y / (1.0 + y);

        // Levels remap.
        let span = (self.white_point - self.blacks).max(1e-3);
        let y = ((y - self.blacks) / span).clamp(0.0, 1.0);

        // Contrast about mid-gray in tonemapped space.
        (0.5 + (y - 0.5) * (1.0 + self.contrast)).clamp(0.0, 1.0)
    }
}

/// Scale an RGB triple so its luminance lands on the tone curve.
#[inline]
pub(crate) fn tonemap_rgb(rgb: Vec3, curve: &ToneCurve) -> Vec3 {
    let y = (LUMA_R * rgb.x + LUMA_G * rgb.y + LUMA_B * rgb.z).max(1e-6);
    rgb * (curve.apply(y) / y)
}

/// White balance choice: explicit temperature wins over the as-shot vector.
#[inline]
pub(crate) fn white_balance_from(
    settings: &PostProcessSettings,
    metadata: &RawImageMetadata,
) -> WhiteBalance {
    if settings.temperature > 0.0 || settings.tint > 0.0 {
        WhiteBalance::Temperature(Temperature::new(
            settings.temperature as f64,
            settings.tint as f64,
        ))
    } else {
        WhiteBalance::AsShot(metadata.as_shot)
    }
}

/// Band-selective chroma gain from the opponent components.
#[inline]
pub(crate) fn chroma_scale(cr: f32, cb: f32, settings: &PostProcessSettings) -> f32 {
    let mut scale = settings.saturation;
    if cb > cr.abs() {
        scale *= settings.blue_saturation;
    } else if cr < 0.0 && cb < 0.0 {
        scale *= settings.green_saturation;
    }
    scale
}

#[inline]
pub(crate) fn gamma_encode(v: f32, inv_gamma: f32) -> f32 {
    v.max(0.0).powf(inv_gamma)
}

// ============================================================================
// Postprocess
// ============================================================================

/// Tone-map denoised Bayer planes into an interleaved 8-bit sRGB image.
///
/// The planes are in the expanded range with black already subtracted; the
/// output is cropped by `offset` halves so its dimensions are
/// `2 * (plane_width - offset_x)` by `2 * (plane_height - offset_y)`.
pub fn postprocess(
    planes: &[Buffer2<u16>; 4],
    offset_x: usize,
    offset_y: usize,
    metadata: &RawImageMetadata,
    camera: &RawCameraMetadata,
    settings: &PostProcessSettings,
) -> Result<image::RgbImage> {
    settings.validate();

    if !metadata.shading_map_valid() {
        return Err(ProcessError::InvalidShadingMap);
    }

    let plane_w = planes[0].width();
    let plane_h = planes[0].height();
    if planes
        .iter()
        .any(|p| p.width() != plane_w || p.height() != plane_h)
    {
        return Err(ProcessError::InvalidState(
            "denoised planes have mismatched dimensions".into(),
        ));
    }
    if offset_x >= plane_w || offset_y >= plane_h {
        return Err(ProcessError::InvalidState(format!(
            "crop offset {offset_x},{offset_y} exceeds plane {plane_w}x{plane_h}"
        )));
    }

    let crop_w = plane_w - offset_x;
    let crop_h = plane_h - offset_y;
    let out_w = crop_w * 2;
    let out_h = crop_h * 2;
    info!(out_w, out_h, "postprocess");

    let wb = white_balance_from(settings, metadata);
    let (camera_to_srgb, camera_white) = create_srgb_matrix(camera, &wb)?;

    let (red, green, blue) = linear_rgb_planes(
        planes,
        crop_w,
        crop_h,
        metadata,
        camera,
        settings,
        &camera_to_srgb,
        camera_white,
    )?;

    // Opponent decomposition for the chroma operations.
    let mut luma = Buffer2::new_default(out_w, out_h);
    let mut cr = Buffer2::new_default(out_w, out_h);
    let mut cb = Buffer2::new_default(out_w, out_h);

    luma.pixels_mut()
        .par_chunks_mut(out_w)
        .zip(cr.pixels_mut().par_chunks_mut(out_w))
        .zip(cb.pixels_mut().par_chunks_mut(out_w))
        .enumerate()
        .for_each(|(y, ((l_row, cr_row), cb_row))| {
            let r_row = red.row(y);
            let g_row = green.row(y);
            let b_row = blue.row(y);
            for x in 0..out_w {
                let l = LUMA_R * r_row[x] + LUMA_G * g_row[x] + LUMA_B * b_row[x];
                let mut pcr = r_row[x] - l;
                let mut pcb = b_row[x] - l;

                let scale = chroma_scale(pcr, pcb, settings);
                pcr *= scale;
                pcb *= scale;

                l_row[x] = l;
                cr_row[x] = pcr;
                cb_row[x] = pcb;
            }
        });

    if settings.chroma_eps > 0.0 {
        cr = smooth_chroma(&cr, &luma, settings.chroma_eps);
        cb = smooth_chroma(&cb, &luma, settings.chroma_eps);
    }

    if settings.sharpen0 != 0.0 || settings.sharpen1 != 0.0 {
        luma = sharpen_luma(&luma, settings.sharpen0, settings.sharpen1);
    }

    // Back to RGB and gamma-encode.
    let inv_gamma = 1.0 / settings.gamma;
    let mut data = vec![0u8; out_w * out_h * 3];

    data.par_chunks_mut(out_w * 3)
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..out_w {
                let l = luma.get(x, y);
                let r = l + cr.get(x, y);
                let b = l + cb.get(x, y);
                let g = ((l - LUMA_R * r - LUMA_B * b) / LUMA_G).max(0.0);

                row[x * 3] = (gamma_encode(r, inv_gamma) * 255.0).clamp(0.0, 255.0) as u8;
                row[x * 3 + 1] = (gamma_encode(g, inv_gamma) * 255.0).clamp(0.0, 255.0) as u8;
                row[x * 3 + 2] = (gamma_encode(b, inv_gamma) * 255.0).clamp(0.0, 255.0) as u8;
            }
        });

    image::RgbImage::from_raw(out_w as u32, out_h as u32, data)
        .ok_or_else(|| ProcessError::Encode("output buffer size mismatch".into()))
}

/// Assemble tonemapped linear RGB planes from the CFA planes.
#[allow(clippy::too_many_arguments)]
fn linear_rgb_planes(
    planes: &[Buffer2<u16>; 4],
    crop_w: usize,
    crop_h: usize,
    metadata: &RawImageMetadata,
    camera: &RawCameraMetadata,
    settings: &PostProcessSettings,
    camera_to_srgb: &Mat3,
    camera_white: Vec3,
) -> Result<(Buffer2<f32>, Buffer2<f32>, Buffer2<f32>)> {
    let out_w = crop_w * 2;
    let out_h = crop_h * 2;

    let (r_idx, [g0_idx, g1_idx], b_idx) = camera.sensor_arrangement.rgb_plane_indices();
    let shading = &metadata.lens_shading_map;
    let map_w = shading[0].width();
    let map_h = shading[0].height();

    let exposure_scale = settings.exposure.exp2();
    let curve = ToneCurve::from_settings(settings);
    let white = camera_white.max(Vec3::splat(1e-4));

    let inv_range = 1.0 / EXPANDED_RANGE;
    let sx = (map_w - 1) as f32 / (crop_w.max(2) - 1) as f32;
    let sy = (map_h - 1) as f32 / (crop_h.max(2) - 1) as f32;

    let mut red = Buffer2::new_default(out_w, out_h);
    let mut green = Buffer2::new_default(out_w, out_h);
    let mut blue = Buffer2::new_default(out_w, out_h);

    red.pixels_mut()
        .par_chunks_mut(out_w)
        .zip(green.pixels_mut().par_chunks_mut(out_w))
        .zip(blue.pixels_mut().par_chunks_mut(out_w))
        .enumerate()
        .for_each(|(y, ((r_row, g_row), b_row))| {
            let py = y / 2;
            let my = py as f32 * sy;
            for x in 0..out_w {
                let px = x / 2;
                let mx = px as f32 * sx;

                let shade = |k: usize| bilinear_f32(&shading[k], mx, my);
                let value = |k: usize| planes[k].get(px, py) as f32 * inv_range * shade(k);

                let r = value(r_idx);
                let g = 0.5 * (value(g0_idx) + value(g1_idx));
                let b = value(b_idx);

                let balanced = Vec3::new(r, g, b) / white;
                let srgb = (*camera_to_srgb * balanced).max(Vec3::ZERO) * exposure_scale;
                let toned = tonemap_rgb(srgb, &curve);

                r_row[x] = toned.x;
                g_row[x] = toned.y;
                b_row[x] = toned.z;
            }
        });

    Ok((red, green, blue))
}

// ============================================================================
// Plane filters
// ============================================================================

/// Edge-aware chroma smoothing guided by the luminance plane.
fn smooth_chroma(chroma: &Buffer2<f32>, luma: &Buffer2<f32>, eps: f32) -> Buffer2<f32> {
    const RADIUS: isize = 2;

    let w = chroma.width();
    let h = chroma.height();
    let inv_sigma = 255.0 / eps.max(1e-3);

    let mut output = Buffer2::new_default(w, h);
    output
        .pixels_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let center = luma.get(x, y);
                let mut sum = 0.0;
                let mut total = 0.0;

                for dy in -RADIUS..=RADIUS {
                    for dx in -RADIUS..=RADIUS {
                        let nx = (x as isize + dx).clamp(0, w as isize - 1);
                        let ny = (y as isize + dy).clamp(0, h as isize - 1);
                        let dl = (luma.get_clamped(nx, ny) - center) * inv_sigma;
                        let weight = (-dl * dl).exp();
                        sum += chroma.get_clamped(nx, ny) * weight;
                        total += weight;
                    }
                }

                *out = sum / total;
            }
        });

    output
}

/// Two-scale unsharp mask on the luminance plane.
fn sharpen_luma(luma: &Buffer2<f32>, sharpen0: f32, sharpen1: f32) -> Buffer2<f32> {
    let blur1 = blur3(luma);
    let blur2 = blur3(&blur3(&blur1));

    let w = luma.width();
    let mut output = Buffer2::new_default(w, luma.height());
    output
        .pixels_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let l = luma.get(x, y);
                let fine = l - blur1.get(x, y);
                let medium = blur1.get(x, y) - blur2.get(x, y);
                *out = (l + sharpen0 * fine + sharpen1 * medium).max(0.0);
            }
        });
    output
}

/// Separable [1 2 1]/4 blur.
fn blur3(plane: &Buffer2<f32>) -> Buffer2<f32> {
    let w = plane.width();
    let h = plane.height();

    let mut horizontal = Buffer2::new_default(w, h);
    horizontal
        .pixels_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let xi = x as isize;
                let yi = y as isize;
                *out = 0.25 * plane.get_clamped(xi - 1, yi)
                    + 0.5 * plane.get(x, y)
                    + 0.25 * plane.get_clamped(xi + 1, yi);
            }
        });

    let mut output = Buffer2::new_default(w, h);
    output
        .pixels_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            let yi = y as isize;
            for (x, out) in row.iter_mut().enumerate() {
                let xi = x as isize;
                *out = 0.25 * horizontal.get_clamped(xi, yi - 1)
                    + 0.5 * horizontal.get(x, y)
                    + 0.25 * horizontal.get_clamped(xi, yi + 1);
            }
        });

    output
}
