//! Packed Bayer readout: four planar half-resolution CFA channels plus a
//! luma preview, edge-extended for the wavelet pyramid.

use rayon::prelude::*;

use crate::common::Buffer2;
use crate::error::{ProcessError, Result};
use crate::frame::{PixelFormat, RawCameraMetadata, RawData, RawImageBuffer};
use crate::wavelet::DENOISE_LEVELS;

/// Amount of right/bottom extension needed to reach the next multiple of
/// 2^DENOISE_LEVELS.
#[inline]
pub fn padded_extent(half_extent: usize) -> usize {
    let t = 1usize << DENOISE_LEVELS;
    half_extent.div_ceil(t) * t - half_extent
}

#[derive(Debug, Clone, Copy)]
pub struct DeinterleaveOptions {
    /// Extend planes so their dimensions are multiples of 2^DENOISE_LEVELS.
    pub extend_edges: bool,
    /// Gain applied to the luma preview.
    pub scale_preview: f32,
}

impl Default for DeinterleaveOptions {
    fn default() -> Self {
        Self {
            extend_edges: true,
            scale_preview: 1.0,
        }
    }
}

/// Random access into a packed raw payload.
pub(crate) struct RawDecoder<'a> {
    bytes: &'a [u8],
    row_stride: usize,
    format: PixelFormat,
}

impl<'a> RawDecoder<'a> {
    pub(crate) fn new(
        bytes: &'a [u8],
        row_stride: usize,
        format: PixelFormat,
        width: usize,
        height: usize,
    ) -> Result<Self> {
        let min_row_bytes = match format {
            PixelFormat::Raw10 => width.div_ceil(4) * 5,
            PixelFormat::Raw12 => width.div_ceil(2) * 3,
            PixelFormat::Raw16 => width * 2,
            PixelFormat::Yuv420Bayer => width,
        };

        if row_stride < min_row_bytes {
            return Err(ProcessError::InvalidState(format!(
                "row stride {row_stride} too small for {width} pixels of {format:?}"
            )));
        }

        let required = (height - 1) * row_stride + min_row_bytes;
        if bytes.len() < required {
            return Err(ProcessError::InvalidState(format!(
                "raw payload has {} bytes, needs {required}",
                bytes.len()
            )));
        }

        Ok(Self {
            bytes,
            row_stride,
            format,
        })
    }

    /// Sample value at sensor coordinates.
    #[inline]
    pub(crate) fn get(&self, x: usize, y: usize) -> u16 {
        match self.format {
            PixelFormat::Raw10 => {
                let base = y * self.row_stride + (x / 4) * 5;
                let i = x % 4;
                let high = self.bytes[base + i] as u16;
                let low = (self.bytes[base + 4] as u16 >> (2 * i)) & 0x3;
                (high << 2) | low
            }
            PixelFormat::Raw12 => {
                let base = y * self.row_stride + (x / 2) * 3;
                if x % 2 == 0 {
                    ((self.bytes[base] as u16) << 4) | (self.bytes[base + 2] as u16 & 0xF)
                } else {
                    ((self.bytes[base + 1] as u16) << 4)
                        | ((self.bytes[base + 2] as u16 >> 4) & 0xF)
                }
            }
            PixelFormat::Raw16 => {
                let base = y * self.row_stride + x * 2;
                u16::from_le_bytes([self.bytes[base], self.bytes[base + 1]])
            }
            PixelFormat::Yuv420Bayer => self.bytes[y * self.row_stride + x] as u16,
        }
    }
}

/// Split a packed frame into four planar CFA channels in sensor-native
/// order (plane 0 = top-left position) plus a luma preview.
///
/// The extension region on the right and bottom is filled by edge-clamp
/// replication.
pub fn deinterleave(
    buffer: &RawImageBuffer,
    camera: &RawCameraMetadata,
    options: &DeinterleaveOptions,
) -> Result<RawData> {
    let half_width = buffer.width / 2;
    let half_height = buffer.height / 2;

    if half_width == 0 || half_height == 0 {
        return Err(ProcessError::InvalidDimensions {
            width: buffer.width,
            height: buffer.height,
        });
    }

    let (extend_x, extend_y) = if options.extend_edges {
        (padded_extent(half_width), padded_extent(half_height))
    } else {
        (0, 0)
    };

    let plane_width = half_width + extend_x;
    let plane_height = half_height + extend_y;

    let guard = buffer.data.lock();
    let decoder = RawDecoder::new(
        &guard,
        buffer.row_stride,
        buffer.pixel_format,
        buffer.width,
        buffer.height,
    )?;

    let white = camera.white_level as u16;

    let mut planes: [Buffer2<u16>; 4] =
        std::array::from_fn(|_| Buffer2::new_default(plane_width, plane_height));

    for (k, plane) in planes.iter_mut().enumerate() {
        let dx = k % 2;
        let dy = k / 2;

        plane
            .pixels_mut()
            .par_chunks_mut(plane_width)
            .enumerate()
            .for_each(|(py, row)| {
                let sy = py.min(half_height - 1) * 2 + dy;
                for (px, out) in row.iter_mut().enumerate() {
                    let sx = px.min(half_width - 1) * 2 + dx;
                    *out = decoder.get(sx, sy).min(white);
                }
            });
    }

    drop(guard);

    let preview = render_luma_preview(&planes, camera, options.scale_preview);

    Ok(RawData {
        planes,
        preview,
        metadata: buffer.metadata.clone(),
    })
}

/// Luma preview from a linear combination of the normalized channels.
fn render_luma_preview(
    planes: &[Buffer2<u16>; 4],
    camera: &RawCameraMetadata,
    scale: f32,
) -> Buffer2<u8> {
    let width = planes[0].width();
    let height = planes[0].height();

    let (r_idx, [g0_idx, g1_idx], b_idx) = camera.sensor_arrangement.rgb_plane_indices();
    let white = camera.white_level;
    let black = camera.black_level;

    let norm = |v: u16, k: usize| -> f32 {
        ((v as f32 - black[k]) / (white - black[k])).clamp(0.0, 1.0)
    };

    let mut preview = Buffer2::new_default(width, height);
    preview
        .pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, out) in row.iter_mut().enumerate() {
                let r = norm(planes[r_idx].get(x, y), r_idx);
                let g0 = norm(planes[g0_idx].get(x, y), g0_idx);
                let g1 = norm(planes[g1_idx].get(x, y), g1_idx);
                let b = norm(planes[b_idx].get(x, y), b_idx);

                let luma = 0.25 * (r + g0 + g1 + b) * scale;
                *out = (luma * 255.0).clamp(0.0, 255.0) as u8;
            }
        });

    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{NativeBuffer, RawImageMetadata, SensorArrangement};

    fn raw16_buffer(width: usize, height: usize, values: &[u16]) -> RawImageBuffer {
        assert_eq!(values.len(), width * height);
        let mut bytes = Vec::with_capacity(values.len() * 2);
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        RawImageBuffer {
            width,
            height,
            row_stride: width * 2,
            pixel_format: PixelFormat::Raw16,
            data: NativeBuffer::new(bytes),
            metadata: RawImageMetadata::default(),
        }
    }

    fn camera() -> RawCameraMetadata {
        RawCameraMetadata {
            sensor_arrangement: SensorArrangement::Rggb,
            black_level: [0.0; 4],
            white_level: 1023.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_padded_extent() {
        assert_eq!(padded_extent(500), 12);
        assert_eq!(padded_extent(375), 9);
        assert_eq!(padded_extent(64), 0);
        assert_eq!(padded_extent(65), 63);
        assert_eq!(padded_extent(32), 32);
    }

    #[test]
    fn test_deinterleave_plane_order() {
        // 4x4 sensor, each 2x2 tile holds [10, 20, 30, 40].
        #[rustfmt::skip]
        let values = vec![
            10, 20, 10, 20,
            30, 40, 30, 40,
            10, 20, 10, 20,
            30, 40, 30, 40,
        ];
        let buffer = raw16_buffer(4, 4, &values);

        let raw = deinterleave(
            &buffer,
            &camera(),
            &DeinterleaveOptions {
                extend_edges: false,
                scale_preview: 1.0,
            },
        )
        .unwrap();

        assert_eq!(raw.width(), 2);
        assert_eq!(raw.height(), 2);
        assert!(raw.planes[0].pixels().iter().all(|&v| v == 10));
        assert!(raw.planes[1].pixels().iter().all(|&v| v == 20));
        assert!(raw.planes[2].pixels().iter().all(|&v| v == 30));
        assert!(raw.planes[3].pixels().iter().all(|&v| v == 40));
    }

    #[test]
    fn test_deinterleave_pads_to_multiple_of_64() {
        let values = vec![100u16; 8 * 6];
        let buffer = raw16_buffer(8, 6, &values);

        let raw = deinterleave(&buffer, &camera(), &DeinterleaveOptions::default()).unwrap();

        assert_eq!(raw.width() % 64, 0);
        assert_eq!(raw.height() % 64, 0);
        // Clamp replication keeps the fill value everywhere.
        assert!(raw.planes[0].pixels().iter().all(|&v| v == 100));
    }

    #[test]
    fn test_edge_clamp_replication() {
        #[rustfmt::skip]
        let values = vec![
            1, 0, 2, 0,
            0, 0, 0, 0,
            3, 0, 4, 0,
            0, 0, 0, 0,
        ];
        let buffer = raw16_buffer(4, 4, &values);

        let raw = deinterleave(&buffer, &camera(), &DeinterleaveOptions::default()).unwrap();

        // Plane 0 content is [[1, 2], [3, 4]]; everything beyond is clamped
        // from the last row/column.
        assert_eq!(raw.planes[0].get(0, 0), 1);
        assert_eq!(raw.planes[0].get(1, 0), 2);
        assert_eq!(raw.planes[0].get(63, 0), 2);
        assert_eq!(raw.planes[0].get(0, 63), 3);
        assert_eq!(raw.planes[0].get(63, 63), 4);
    }

    #[test]
    fn test_values_clamped_to_white_level() {
        let values = vec![9999u16; 4];
        let buffer = raw16_buffer(2, 2, &values);

        let raw = deinterleave(
            &buffer,
            &camera(),
            &DeinterleaveOptions {
                extend_edges: false,
                scale_preview: 1.0,
            },
        )
        .unwrap();

        assert!(raw.planes.iter().all(|p| p.pixels()[0] == 1023));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let buffer = RawImageBuffer {
            width: 1,
            height: 0,
            row_stride: 2,
            pixel_format: PixelFormat::Raw16,
            data: NativeBuffer::new(vec![]),
            metadata: RawImageMetadata::default(),
        };

        let result = deinterleave(&buffer, &camera(), &DeinterleaveOptions::default());
        assert!(matches!(
            result,
            Err(ProcessError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_short_payload_rejected() {
        let buffer = RawImageBuffer {
            width: 4,
            height: 4,
            row_stride: 8,
            pixel_format: PixelFormat::Raw16,
            data: NativeBuffer::new(vec![0u8; 8]),
            metadata: RawImageMetadata::default(),
        };

        let result = deinterleave(&buffer, &camera(), &DeinterleaveOptions::default());
        assert!(matches!(result, Err(ProcessError::InvalidState(_))));
    }

    #[test]
    fn test_raw10_decode() {
        // One group of 4 pixels: high bytes 1, 2, 3, 4 and low bits
        // 0b11_10_01_00 -> values (1<<2), (2<<2)|1, (3<<2)|2, (4<<2)|3.
        let bytes = vec![1u8, 2, 3, 4, 0b1110_0100];
        let decoder = RawDecoder::new(&bytes, 5, PixelFormat::Raw10, 4, 1).unwrap();

        assert_eq!(decoder.get(0, 0), 4);
        assert_eq!(decoder.get(1, 0), 9);
        assert_eq!(decoder.get(2, 0), 14);
        assert_eq!(decoder.get(3, 0), 19);
    }

    #[test]
    fn test_raw12_decode() {
        // Two pixels in 3 bytes: high bytes 0xAB, 0xCD, packed lows 0x21.
        let bytes = vec![0xAB, 0xCD, 0x21];
        let decoder = RawDecoder::new(&bytes, 3, PixelFormat::Raw12, 2, 1).unwrap();

        assert_eq!(decoder.get(0, 0), (0xAB << 4) | 0x1);
        assert_eq!(decoder.get(1, 0), (0xCD << 4) | 0x2);
    }

    #[test]
    fn test_preview_scale() {
        let values = vec![512u16; 16];
        let buffer = raw16_buffer(4, 4, &values);

        let opts = DeinterleaveOptions {
            extend_edges: false,
            scale_preview: 1.0,
        };
        let raw = deinterleave(&buffer, &camera(), &opts).unwrap();
        let base = raw.preview.get(0, 0);

        let opts = DeinterleaveOptions {
            extend_edges: false,
            scale_preview: 0.5,
        };
        let dimmed = deinterleave(&buffer, &camera(), &opts).unwrap();
        assert!(dimmed.preview.get(0, 0) < base);
    }
}
