//! Typed containers for raw frames, camera profile and per-frame metadata.

mod native_buffer;
mod settings;

pub use native_buffer::{BufferGuard, NativeBuffer};
pub use settings::PostProcessSettings;

use glam::Vec3;

use crate::color::Illuminant;
use crate::common::Buffer2;

// ============================================================================
// Enumerations
// ============================================================================

/// Packed sensor pixel layouts recognized by the deinterleaver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 pixels packed into 5 bytes.
    Raw10,
    /// 2 pixels packed into 3 bytes.
    Raw12,
    /// Little-endian 16-bit samples.
    Raw16,
    /// Bayer mosaic carried in the luma plane of a YUV buffer, 8-bit.
    Yuv420Bayer,
}

/// Device orientation at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScreenOrientation {
    #[default]
    Landscape,
    Portrait,
    ReverseLandscape,
    ReversePortrait,
}

/// 2x2 color filter array layout of the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorArrangement {
    #[default]
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

impl SensorArrangement {
    /// Plane indices of (red, [green0, green1], blue) in sensor-native CFA
    /// order (plane 0 = top-left position of the 2x2 tile).
    #[inline]
    pub fn rgb_plane_indices(self) -> (usize, [usize; 2], usize) {
        match self {
            SensorArrangement::Rggb => (0, [1, 2], 3),
            SensorArrangement::Grbg => (1, [0, 3], 2),
            SensorArrangement::Gbrg => (2, [0, 3], 1),
            SensorArrangement::Bggr => (3, [1, 2], 0),
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Per-frame capture metadata.
#[derive(Debug, Clone)]
pub struct RawImageMetadata {
    pub iso: u32,
    /// Exposure time in nanoseconds.
    pub exposure_time: i64,
    /// Exposure compensation as a fixed-point ratio (numerator, denominator).
    pub exposure_compensation: (i32, i32),
    /// Camera neutral vector. All components >= 0, max > 0.
    pub as_shot: Vec3,
    /// Per-CFA-position channel trim.
    pub color_correction: [f32; 4],
    /// Vignetting gain grids, one per CFA position, identical dimensions.
    pub lens_shading_map: [Buffer2<f32>; 4],
    pub screen_orientation: ScreenOrientation,
}

impl Default for RawImageMetadata {
    fn default() -> Self {
        Self {
            iso: 100,
            exposure_time: 10_000_000,
            exposure_compensation: (0, 1),
            as_shot: Vec3::ONE,
            color_correction: [1.0; 4],
            lens_shading_map: std::array::from_fn(|_| Buffer2::new_filled(4, 3, 1.0)),
            screen_orientation: ScreenOrientation::Landscape,
        }
    }
}

impl RawImageMetadata {
    /// True when all four shading planes share the same dimensions.
    pub fn shading_map_valid(&self) -> bool {
        let w = self.lens_shading_map[0].width();
        let h = self.lens_shading_map[0].height();
        w > 0
            && h > 0
            && self
                .lens_shading_map
                .iter()
                .all(|m| m.width() == w && m.height() == h)
    }
}

/// Static sensor and color-calibration metadata.
#[derive(Debug, Clone)]
pub struct RawCameraMetadata {
    pub sensor_arrangement: SensorArrangement,
    pub black_level: [f32; 4],
    pub white_level: f32,
    /// XYZ-to-camera matrix calibrated under `color_illuminant1`.
    pub color_matrix1: glam::Mat3,
    /// XYZ-to-camera matrix calibrated under `color_illuminant2`.
    pub color_matrix2: glam::Mat3,
    /// Camera-to-XYZ(D50) matrix calibrated under `color_illuminant1`.
    pub forward_matrix1: glam::Mat3,
    /// Camera-to-XYZ(D50) matrix calibrated under `color_illuminant2`.
    pub forward_matrix2: glam::Mat3,
    pub color_illuminant1: Illuminant,
    pub color_illuminant2: Illuminant,
    pub apertures: Vec<f32>,
    pub focal_lengths: Vec<f32>,
}

impl Default for RawCameraMetadata {
    fn default() -> Self {
        Self {
            sensor_arrangement: SensorArrangement::Rggb,
            black_level: [64.0; 4],
            white_level: 1023.0,
            color_matrix1: glam::Mat3::IDENTITY,
            color_matrix2: glam::Mat3::IDENTITY,
            // Maps a unit camera neutral onto the D50 PCS white.
            forward_matrix1: glam::Mat3::from_diagonal(glam::Vec3::new(0.9642, 1.0, 0.8249)),
            forward_matrix2: glam::Mat3::from_diagonal(glam::Vec3::new(0.9642, 1.0, 0.8249)),
            color_illuminant1: Illuminant::StandardA,
            color_illuminant2: Illuminant::D65,
            apertures: vec![],
            focal_lengths: vec![],
        }
    }
}

// ============================================================================
// RawImageBuffer
// ============================================================================

/// A packed raw frame as delivered by the container.
#[derive(Debug)]
pub struct RawImageBuffer {
    pub width: usize,
    pub height: usize,
    pub row_stride: usize,
    pub pixel_format: PixelFormat,
    pub data: NativeBuffer,
    pub metadata: RawImageMetadata,
}

// ============================================================================
// RawData
// ============================================================================

/// Deinterleaved frame: four planar CFA channels plus a luma preview.
///
/// Planes are (halfWidth + extendX, halfHeight + extendY); the preview has
/// the same dimensions. Owned by the fusion loop and dropped as soon as the
/// frame's contribution is accumulated.
#[derive(Debug, Clone)]
pub struct RawData {
    pub planes: [Buffer2<u16>; 4],
    pub preview: Buffer2<u8>,
    pub metadata: RawImageMetadata,
}

impl RawData {
    pub fn width(&self) -> usize {
        self.planes[0].width()
    }

    pub fn height(&self) -> usize {
        self.planes[0].height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_plane_indices() {
        let (r, g, b) = SensorArrangement::Rggb.rgb_plane_indices();
        assert_eq!((r, g, b), (0, [1, 2], 3));

        let (r, g, b) = SensorArrangement::Bggr.rgb_plane_indices();
        assert_eq!((r, g, b), (3, [1, 2], 0));

        let (r, g, b) = SensorArrangement::Grbg.rgb_plane_indices();
        assert_eq!((r, g, b), (1, [0, 3], 2));

        let (r, g, b) = SensorArrangement::Gbrg.rgb_plane_indices();
        assert_eq!((r, g, b), (2, [0, 3], 1));
    }

    #[test]
    fn test_shading_map_valid() {
        let metadata = RawImageMetadata::default();
        assert!(metadata.shading_map_valid());

        let mut bad = RawImageMetadata::default();
        bad.lens_shading_map[2] = Buffer2::new_filled(5, 3, 1.0);
        assert!(!bad.shading_map_valid());
    }
}
