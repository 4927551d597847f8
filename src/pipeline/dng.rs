//! DNG output preparation and the external writer interface.
//!
//! The writer itself is an external collaborator; this module owns the
//! data preparation the pipeline is responsible for: CFA reordering to
//! RGGB, Bayer interleaving, cropping, and the tag-value mappings.

use std::path::Path;

use crate::color::Illuminant;
use crate::common::Buffer2;
use crate::frame::{RawCameraMetadata, RawImageMetadata, ScreenOrientation, SensorArrangement};
use crate::wavelet::EXPANDED_RANGE;

/// Base orientation tag of the written DNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DngOrientation {
    Normal,
    Rotate90Cw,
    Rotate180,
    Rotate90Ccw,
}

pub fn base_orientation(orientation: ScreenOrientation) -> DngOrientation {
    match orientation {
        ScreenOrientation::Landscape => DngOrientation::Normal,
        ScreenOrientation::Portrait => DngOrientation::Rotate90Cw,
        ScreenOrientation::ReverseLandscape => DngOrientation::Rotate180,
        ScreenOrientation::ReversePortrait => DngOrientation::Rotate90Ccw,
    }
}

/// TIFF/EP calibration illuminant code.
pub fn dng_illuminant_code(illuminant: Illuminant) -> u16 {
    match illuminant {
        Illuminant::StandardA => 17,
        Illuminant::StandardB => 18,
        Illuminant::StandardC => 19,
        Illuminant::D55 => 20,
        Illuminant::D65 => 21,
        Illuminant::D75 => 22,
        Illuminant::D50 => 23,
    }
}

/// Gain-map top-left offsets for the four RGGB positions.
pub const GAIN_MAP_OFFSETS: [(u32, u32); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

/// Permute sensor-native planes into RGGB order.
///
/// This table is authoritative; it is not re-derived from the arrangement
/// at write time.
pub fn reorder_to_rggb(
    planes: [Buffer2<u16>; 4],
    arrangement: SensorArrangement,
) -> [Buffer2<u16>; 4] {
    let [p0, p1, p2, p3] = planes;
    match arrangement {
        SensorArrangement::Rggb => [p0, p1, p2, p3],
        SensorArrangement::Grbg => [p1, p0, p3, p2],
        SensorArrangement::Gbrg => [p2, p0, p3, p1],
        SensorArrangement::Bggr => [p3, p1, p2, p0],
    }
}

/// Interleave four RGGB planes into one full-resolution Bayer image,
/// cropping the pad region.
pub fn build_raw_image(planes: &[Buffer2<u16>; 4], crop_x: usize, crop_y: usize) -> Buffer2<u16> {
    let plane_w = planes[0].width();
    let plane_h = planes[0].height();
    debug_assert!(crop_x < plane_w && crop_y < plane_h);

    let out_w = (plane_w - crop_x) * 2;
    let out_h = (plane_h - crop_y) * 2;

    let mut output = Buffer2::new_default(out_w, out_h);
    for ry in 0..plane_h - crop_y {
        for rx in 0..plane_w - crop_x {
            output.set(rx * 2, ry * 2, planes[0].get(rx, ry));
            output.set(rx * 2 + 1, ry * 2, planes[1].get(rx, ry));
            output.set(rx * 2, ry * 2 + 1, planes[2].get(rx, ry));
            output.set(rx * 2 + 1, ry * 2 + 1, planes[3].get(rx, ry));
        }
    }

    output
}

/// Prepared DNG payload: uncompressed RGGB Bayer data plus the fixed tag
/// values of this pipeline's output.
#[derive(Debug, Clone)]
pub struct DngImage {
    /// Interleaved RGGB Bayer image, black level already subtracted.
    pub data: Buffer2<u16>,
    pub orientation: DngOrientation,
}

impl DngImage {
    /// The denoiser stretches its output into this range.
    pub const WHITE_LEVEL: u16 = EXPANDED_RANGE as u16;
    /// Black level is zero after expansion.
    pub const BLACK_LEVEL: [u16; 4] = [0; 4];
    pub const MODEL_NAME: &'static str = "MotionCam";

    /// Calibration illuminant codes for the camera's two profiles.
    pub fn illuminant_codes(camera: &RawCameraMetadata) -> (u16, u16) {
        (
            dng_illuminant_code(camera.color_illuminant1),
            dng_illuminant_code(camera.color_illuminant2),
        )
    }
}

/// External DNG writer interface.
pub trait DngWriter {
    fn write_dng(
        &self,
        image: &DngImage,
        camera: &RawCameraMetadata,
        metadata: &RawImageMetadata,
        path: &Path,
    ) -> anyhow::Result<()>;
}
