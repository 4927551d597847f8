//! Reduced-cost preview: deinterleave and tonemap fused in one pass at
//! 1/2, 1/4 or 1/8 of half resolution, rotated for the screen orientation.

use glam::Vec3;
use rayon::prelude::*;

use crate::color::create_srgb_matrix;
use crate::deinterleave::RawDecoder;
use crate::error::{ProcessError, Result};
use crate::frame::{RawCameraMetadata, RawImageBuffer, PostProcessSettings, ScreenOrientation};
use crate::math::bilinear_f32;

use super::{chroma_scale, gamma_encode, tonemap_rgb, white_balance_from, ToneCurve};

const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

/// Interleaved BGRA preview.
#[derive(Debug, Clone)]
pub struct PreviewImage {
    width: usize,
    height: usize,
    pub data: Vec<u8>,
}

impl PreviewImage {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 4] {
        debug_assert!(x < self.width && y < self.height);
        let i = (y * self.width + x) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Rec. 601 luma of a pixel, in [0, 255].
    #[inline]
    pub fn luma(&self, x: usize, y: usize) -> f32 {
        let [b, g, r, _] = self.pixel(x, y);
        LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32
    }

    /// Mean luma over the whole preview.
    pub fn mean_luma(&self) -> f32 {
        let mut sum = 0.0f64;
        for y in 0..self.height {
            for x in 0..self.width {
                sum += self.luma(x, y) as f64;
            }
        }
        (sum / (self.width * self.height) as f64) as f32
    }
}

/// Render a BGRA preview of a packed raw frame.
///
/// `downscale` selects 1/2, 1/4 or 1/8 of half resolution; anything else
/// is rejected. The output is rotated for the frame's screen orientation
/// and mirrored when `settings.flipped` is set.
pub fn create_preview(
    buffer: &RawImageBuffer,
    camera: &RawCameraMetadata,
    settings: &PostProcessSettings,
    downscale: usize,
) -> Result<PreviewImage> {
    if !matches!(downscale, 2 | 4 | 8) {
        return Err(ProcessError::InvalidDownscale(downscale));
    }
    if !buffer.metadata.shading_map_valid() {
        return Err(ProcessError::InvalidShadingMap);
    }

    let half_width = buffer.width / 2;
    let half_height = buffer.height / 2;
    let width = half_width / downscale;
    let height = half_height / downscale;

    if width == 0 || height == 0 {
        return Err(ProcessError::InvalidDimensions {
            width: buffer.width,
            height: buffer.height,
        });
    }

    let wb = white_balance_from(settings, &buffer.metadata);
    let (camera_to_srgb, camera_white) = create_srgb_matrix(camera, &wb)?;
    let white = camera_white.max(Vec3::splat(1e-4));

    let (r_idx, [g0_idx, g1_idx], b_idx) = camera.sensor_arrangement.rgb_plane_indices();
    let shading = &buffer.metadata.lens_shading_map;
    let color_correction = buffer.metadata.color_correction;
    let black = camera.black_level;
    let white_level = camera.white_level;

    let map_sx = (shading[0].width() - 1) as f32 / (half_width.max(2) - 1) as f32;
    let map_sy = (shading[0].height() - 1) as f32 / (half_height.max(2) - 1) as f32;

    let curve = ToneCurve::from_settings(settings);
    let exposure_scale = settings.exposure.exp2();
    let inv_gamma = 1.0 / settings.gamma;

    let guard = buffer.data.lock();
    let decoder = RawDecoder::new(
        &guard,
        buffer.row_stride,
        buffer.pixel_format,
        buffer.width,
        buffer.height,
    )?;

    let mut upright = vec![0u8; width * height * 4];
    upright
        .par_chunks_mut(width * 4)
        .enumerate()
        .for_each(|(y, row)| {
            let hy = (y * downscale).min(half_height - 1);
            let my = hy as f32 * map_sy;
            for x in 0..width {
                let hx = (x * downscale).min(half_width - 1);
                let mx = hx as f32 * map_sx;

                let channel = |k: usize| -> f32 {
                    let raw = decoder.get(2 * hx + k % 2, 2 * hy + k / 2) as f32;
                    let lin = ((raw - black[k]) / (white_level - black[k])).clamp(0.0, 1.0);
                    lin * color_correction[k] * bilinear_f32(&shading[k], mx, my)
                };

                let r = channel(r_idx);
                let g = 0.5 * (channel(g0_idx) + channel(g1_idx));
                let b = channel(b_idx);

                let srgb =
                    (camera_to_srgb * (Vec3::new(r, g, b) / white)).max(Vec3::ZERO) * exposure_scale;
                let toned = tonemap_rgb(srgb, &curve);

                // Chroma adjustment, no smoothing at preview cost.
                let l = 0.2126 * toned.x + 0.7152 * toned.y + 0.0722 * toned.z;
                let mut cr = toned.x - l;
                let mut cb = toned.z - l;
                let scale = chroma_scale(cr, cb, settings);
                cr *= scale;
                cb *= scale;

                let rr = l + cr;
                let bb = l + cb;
                let gg = ((l - 0.2126 * rr - 0.0722 * bb) / 0.7152).max(0.0);

                let i = x * 4;
                row[i] = (gamma_encode(bb, inv_gamma) * 255.0).clamp(0.0, 255.0) as u8;
                row[i + 1] = (gamma_encode(gg, inv_gamma) * 255.0).clamp(0.0, 255.0) as u8;
                row[i + 2] = (gamma_encode(rr, inv_gamma) * 255.0).clamp(0.0, 255.0) as u8;
                row[i + 3] = 255;
            }
        });

    drop(guard);

    Ok(orient(
        &upright,
        width,
        height,
        buffer.metadata.screen_orientation,
        settings.flipped,
    ))
}

/// Rotate the upright BGRA buffer for the screen orientation; mirror
/// horizontally when flipped.
fn orient(
    upright: &[u8],
    width: usize,
    height: usize,
    orientation: ScreenOrientation,
    flipped: bool,
) -> PreviewImage {
    let (out_width, out_height) = match orientation {
        ScreenOrientation::Landscape | ScreenOrientation::ReverseLandscape => (width, height),
        ScreenOrientation::Portrait | ScreenOrientation::ReversePortrait => (height, width),
    };

    let mut data = vec![0u8; out_width * out_height * 4];
    data.par_chunks_mut(out_width * 4)
        .enumerate()
        .for_each(|(oy, row)| {
            for ox in 0..out_width {
                let fx = if flipped { out_width - 1 - ox } else { ox };

                let (sx, sy) = match orientation {
                    ScreenOrientation::Landscape => (fx, oy),
                    ScreenOrientation::ReverseLandscape => (width - 1 - fx, height - 1 - oy),
                    // Rotate 90 CW: source column becomes output row.
                    ScreenOrientation::Portrait => (oy, height - 1 - fx),
                    // Rotate 90 CCW.
                    ScreenOrientation::ReversePortrait => (width - 1 - oy, fx),
                };

                let src = (sy * width + sx) * 4;
                let dst = ox * 4;
                row[dst..dst + 4].copy_from_slice(&upright[src..src + 4]);
            }
        });

    PreviewImage {
        width: out_width,
        height: out_height,
        data,
    }
}
