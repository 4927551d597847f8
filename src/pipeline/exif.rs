//! EXIF tag preparation and the external metadata-embedding interface.

use std::path::Path;

use crate::frame::{RawCameraMetadata, RawImageMetadata, ScreenOrientation};

/// EXIF orientation tag for a capture orientation, optionally mirrored.
pub fn exif_orientation(orientation: ScreenOrientation, flipped: bool) -> u16 {
    match orientation {
        ScreenOrientation::Landscape => {
            if flipped {
                2
            } else {
                1
            }
        }
        ScreenOrientation::Portrait => {
            if flipped {
                5
            } else {
                6
            }
        }
        ScreenOrientation::ReverseLandscape => {
            if flipped {
                4
            } else {
                3
            }
        }
        ScreenOrientation::ReversePortrait => {
            if flipped {
                7
            } else {
                8
            }
        }
    }
}

/// Approximate a non-negative float as an unsigned rational.
pub fn float_to_rational(value: f32) -> (u32, u32) {
    if value <= 0.0 {
        return (0, 1);
    }
    if value >= 1000.0 {
        return (value.round() as u32, 1);
    }

    let denominator = 1_000_000u64;
    let numerator = (value as f64 * denominator as f64).round() as u64;
    let divisor = gcd(numerator.max(1), denominator);
    ((numerator / divisor) as u32, (denominator / divisor) as u32)
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Tag values embedded into the output JPEG.
#[derive(Debug, Clone, PartialEq)]
pub struct ExifMetadata {
    pub iso: u32,
    /// Exposure time as rational seconds.
    pub exposure_time: (u32, u32),
    pub orientation: u16,
    pub aperture: Option<(u32, u32)>,
    pub focal_length: Option<(u32, u32)>,
    pub lens_model: &'static str,
    pub lens_make: &'static str,
    /// 1 = sRGB.
    pub color_space: u16,
    /// 1 = directly photographed.
    pub scene_type: u8,
    /// Dots per inch, both axes.
    pub resolution: (u32, u32),
    /// 0 = manual white balance.
    pub white_balance: u8,
}

impl ExifMetadata {
    pub fn new(metadata: &RawImageMetadata, camera: &RawCameraMetadata, flipped: bool) -> Self {
        Self {
            iso: metadata.iso,
            exposure_time: float_to_rational(metadata.exposure_time as f32 / 1e9),
            orientation: exif_orientation(metadata.screen_orientation, flipped),
            aperture: camera.apertures.first().map(|&f| float_to_rational(f)),
            focal_length: camera.focal_lengths.first().map(|&f| float_to_rational(f)),
            lens_model: "MotionCam",
            lens_make: "MotionCam",
            color_space: 1,
            scene_type: 1,
            resolution: (72, 1),
            white_balance: 0,
        }
    }
}

/// External EXIF embedder interface. Receives the finished JPEG path, the
/// tag values and the thumbnail JPEG payload.
pub trait ExifWriter {
    fn embed(&self, path: &Path, exif: &ExifMetadata, thumbnail_jpeg: &[u8])
        -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_table() {
        let cases = [
            (ScreenOrientation::Landscape, false, 1),
            (ScreenOrientation::Landscape, true, 2),
            (ScreenOrientation::ReverseLandscape, false, 3),
            (ScreenOrientation::ReverseLandscape, true, 4),
            (ScreenOrientation::Portrait, true, 5),
            (ScreenOrientation::Portrait, false, 6),
            (ScreenOrientation::ReversePortrait, true, 7),
            (ScreenOrientation::ReversePortrait, false, 8),
        ];

        for (orientation, flipped, expected) in cases {
            assert_eq!(
                exif_orientation(orientation, flipped),
                expected,
                "{orientation:?} flipped={flipped}"
            );
        }
    }

    #[test]
    fn test_rational_reduces() {
        // 10 ms.
        assert_eq!(float_to_rational(0.01), (1, 100));
        assert_eq!(float_to_rational(0.5), (1, 2));
        assert_eq!(float_to_rational(0.0), (0, 1));
    }

    #[test]
    fn test_rational_large_values() {
        assert_eq!(float_to_rational(4000.0), (4000, 1));
    }

    #[test]
    fn test_metadata_fields() {
        let metadata = RawImageMetadata {
            iso: 800,
            exposure_time: 20_000_000,
            screen_orientation: ScreenOrientation::Portrait,
            ..Default::default()
        };
        let camera = RawCameraMetadata {
            apertures: vec![1.8],
            focal_lengths: vec![4.3],
            ..Default::default()
        };

        let exif = ExifMetadata::new(&metadata, &camera, false);

        assert_eq!(exif.iso, 800);
        assert_eq!(exif.exposure_time, (1, 50));
        assert_eq!(exif.orientation, 6);
        assert_eq!(exif.lens_model, "MotionCam");
        assert_eq!(exif.color_space, 1);
        assert_eq!(exif.scene_type, 1);
        assert_eq!(exif.resolution, (72, 1));
        assert_eq!(exif.white_balance, 0);
        assert!(exif.aperture.is_some());
        assert!(exif.focal_length.is_some());
    }

    #[test]
    fn test_metadata_without_lens_info() {
        let exif = ExifMetadata::new(
            &RawImageMetadata::default(),
            &RawCameraMetadata::default(),
            false,
        );
        assert!(exif.aperture.is_none());
        assert!(exif.focal_length.is_none());
    }
}
