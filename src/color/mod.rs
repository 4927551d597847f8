//! Camera color profile: illuminant-interpolated matrices and the
//! camera-to-sRGB conversion.

mod temperature;

pub use temperature::{Illuminant, Temperature};

use glam::{DMat3, DVec2, DVec3, Mat3, Vec3};

use crate::error::{ProcessError, Result};
use crate::frame::RawCameraMetadata;

/// White balance source for matrix construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WhiteBalance {
    /// Explicit temperature and tint.
    Temperature(Temperature),
    /// Per-capture camera neutral vector.
    AsShot(Vec3),
}

/// Interpolates the calibrated color matrices between the two reference
/// illuminants and derives white points from neutral vectors.
pub struct CameraProfile<'a> {
    camera: &'a RawCameraMetadata,
}

impl<'a> CameraProfile<'a> {
    pub fn new(camera: &'a RawCameraMetadata) -> Self {
        Self { camera }
    }

    /// Blend fraction toward the illuminant-1 calibration, linear in
    /// reciprocal temperature, clamped to [0, 1].
    fn interpolation_weight(&self, temperature: f64) -> f64 {
        let t1 = self.camera.color_illuminant1.temperature();
        let t2 = self.camera.color_illuminant2.temperature();

        if (t1 - t2).abs() < f64::EPSILON {
            return 1.0;
        }

        let temperature = temperature.max(1.0);
        let inv = 1.0 / temperature;
        let inv1 = 1.0 / t1;
        let inv2 = 1.0 / t2;

        ((inv - inv2) / (inv1 - inv2)).clamp(0.0, 1.0)
    }

    /// XYZ-to-camera matrix at the given temperature.
    fn color_matrix(&self, temperature: f64) -> DMat3 {
        let g = self.interpolation_weight(temperature);
        let m1 = self.camera.color_matrix1.as_dmat3();
        let m2 = self.camera.color_matrix2.as_dmat3();
        m1 * g + m2 * (1.0 - g)
    }

    /// Camera-to-XYZ(D50) matrix at the given temperature.
    fn forward_matrix(&self, temperature: f64) -> DMat3 {
        let g = self.interpolation_weight(temperature);
        let m1 = self.camera.forward_matrix1.as_dmat3();
        let m2 = self.camera.forward_matrix2.as_dmat3();
        m1 * g + m2 * (1.0 - g)
    }

    /// Invert the neutral-from-temperature mapping: find the temperature and
    /// tint whose white maps to the given camera-neutral vector.
    ///
    /// Fails when the vector is all-zero.
    pub fn temperature_from_vector(&self, neutral: Vec3) -> Result<Temperature> {
        let max = neutral.max_element();
        if max <= 0.0 {
            return Err(ProcessError::ZeroWhiteBalance);
        }
        let neutral = (neutral * (1.0 / max)).as_dvec3();

        // Fixed-point iteration: map the neutral back through the matrix at
        // the current temperature estimate until the chromaticity settles.
        let mut xy = D50_XY;
        for _ in 0..30 {
            let t = Temperature::from_xy(xy);
            let cm = self.color_matrix(t.temperature());
            let next = xyz_to_xy(cm.inverse() * neutral);

            let delta = (next - xy).abs();
            xy = next;
            if delta.max_element() < 1e-7 {
                break;
            }
        }

        Ok(Temperature::from_xy(xy))
    }

    /// Camera-to-PCS matrix and the normalized camera white for a white
    /// point.
    pub fn camera_to_pcs(&self, temperature: &Temperature) -> (DMat3, DVec3) {
        let xy = temperature.to_xy();
        let cm = self.color_matrix(temperature.temperature());

        let neutral = cm * xy_to_xyz(xy);
        let max = neutral.max_element();
        debug_assert!(max > 0.0, "camera neutral collapsed to zero");
        let camera_white = neutral / max;

        let fm = self.forward_matrix(temperature.temperature());
        let camera_to_pcs = fm * DMat3::from_diagonal(camera_white.recip());

        (camera_to_pcs, camera_white)
    }

    /// XYZ(D50) to linear sRGB: Bradford adaptation to D65 followed by the
    /// sRGB primaries matrix.
    pub fn pcs_to_srgb() -> DMat3 {
        let srgb_from_xyz_d65 = dmat3_from_rows([
            [3.2404542, -1.5371385, -0.4985314],
            [-0.9692660, 1.8760108, 0.0415560],
            [0.0556434, -0.2040259, 1.0572252],
        ]);
        let bradford_d50_to_d65 = dmat3_from_rows([
            [0.9555766, -0.0230393, 0.0631636],
            [-0.0282895, 1.0099416, 0.0210077],
            [0.0122982, -0.0204830, 1.3299098],
        ]);
        srgb_from_xyz_d65 * bradford_d50_to_d65
    }
}

/// Build the camera-to-sRGB matrix and camera white vector for a white
/// balance choice.
pub fn create_srgb_matrix(
    camera: &RawCameraMetadata,
    white_balance: &WhiteBalance,
) -> Result<(Mat3, Vec3)> {
    let profile = CameraProfile::new(camera);

    let temperature = match white_balance {
        WhiteBalance::Temperature(t) => *t,
        WhiteBalance::AsShot(v) => profile.temperature_from_vector(*v)?,
    };

    let (camera_to_pcs, camera_white) = profile.camera_to_pcs(&temperature);
    let camera_to_srgb = CameraProfile::pcs_to_srgb() * camera_to_pcs;

    Ok((camera_to_srgb.as_mat3(), camera_white.as_vec3()))
}

const D50_XY: DVec2 = DVec2::new(0.3457, 0.3585);

#[inline]
fn xy_to_xyz(xy: DVec2) -> DVec3 {
    debug_assert!(xy.y > 0.0);
    DVec3::new(xy.x / xy.y, 1.0, (1.0 - xy.x - xy.y) / xy.y)
}

#[inline]
fn xyz_to_xy(xyz: DVec3) -> DVec2 {
    let sum = xyz.x + xyz.y + xyz.z;
    if sum.abs() < 1e-12 {
        return D50_XY;
    }
    DVec2::new(xyz.x / sum, xyz.y / sum)
}

#[inline]
fn dmat3_from_rows(rows: [[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols_array_2d(&rows).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcs_to_srgb_maps_d50_white_to_unity() {
        let d50 = DVec3::new(0.9642, 1.0, 0.8249);
        let rgb = CameraProfile::pcs_to_srgb() * d50;
        assert!((rgb.x - 1.0).abs() < 2e-3, "{rgb:?}");
        assert!((rgb.y - 1.0).abs() < 2e-3, "{rgb:?}");
        assert!((rgb.z - 1.0).abs() < 2e-3, "{rgb:?}");
    }

    #[test]
    fn test_interpolation_weight_clamps() {
        let camera = RawCameraMetadata::default();
        let profile = CameraProfile::new(&camera);

        // Below illuminant 1 (2850 K) everything is matrix 1.
        assert_eq!(profile.interpolation_weight(1500.0), 1.0);
        // Above illuminant 2 (6504 K) everything is matrix 2.
        assert_eq!(profile.interpolation_weight(9000.0), 0.0);

        let mid = profile.interpolation_weight(4000.0);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn test_as_shot_normalization_is_exact() {
        let camera = RawCameraMetadata::default();

        let raw = Vec3::new(0.9, 1.8, 1.2);
        let normalized = raw / raw.max_element();

        let (m1, w1) = create_srgb_matrix(&camera, &WhiteBalance::AsShot(raw)).unwrap();
        let (m2, w2) = create_srgb_matrix(&camera, &WhiteBalance::AsShot(normalized)).unwrap();

        assert_eq!(m1.to_cols_array(), m2.to_cols_array());
        assert_eq!(w1, w2);
    }

    #[test]
    fn test_zero_as_shot_fails() {
        let camera = RawCameraMetadata::default();
        let result = create_srgb_matrix(&camera, &WhiteBalance::AsShot(Vec3::ZERO));
        assert!(matches!(result, Err(ProcessError::ZeroWhiteBalance)));
    }

    #[test]
    fn test_temperature_from_identity_neutral() {
        // With identity matrices a unit neutral is the equal-energy point,
        // which sits near 5450 K on the locus.
        let camera = RawCameraMetadata::default();
        let profile = CameraProfile::new(&camera);

        let t = profile.temperature_from_vector(Vec3::ONE).unwrap();
        assert!(
            t.temperature() > 4500.0 && t.temperature() < 6500.0,
            "{}",
            t.temperature()
        );
    }

    #[test]
    fn test_camera_white_max_is_one() {
        let camera = RawCameraMetadata::default();
        let (_, white) =
            create_srgb_matrix(&camera, &WhiteBalance::AsShot(Vec3::new(0.6, 1.0, 0.8))).unwrap();
        assert!((white.max_element() - 1.0).abs() < 1e-6);
        assert!(white.min_element() > 0.0);
    }
}
