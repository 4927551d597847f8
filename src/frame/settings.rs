//! User-facing post-processing configuration.

/// Tone-mapping and output settings for one processed image.
///
/// `temperature`/`tint` of zero selects the per-frame as-shot neutral for
/// white balance.
#[derive(Debug, Clone, PartialEq)]
pub struct PostProcessSettings {
    pub temperature: f32,
    pub tint: f32,
    /// Exposure bias in stops, applied as 2^exposure.
    pub exposure: f32,
    /// Shadow gain, >= 1.
    pub shadows: f32,
    /// Black point in [0, 1] of the tonemapped range.
    pub blacks: f32,
    /// White point in [0, 1] of the tonemapped range.
    pub white_point: f32,
    pub gamma: f32,
    /// Contrast strength applied about 0.5 in tonemapped space.
    pub contrast: f32,
    pub saturation: f32,
    pub blue_saturation: f32,
    pub green_saturation: f32,
    /// Variance of the luminance weight in the shadow-lift curve.
    pub tonemap_variance: f32,
    /// Fine-scale luminance sharpening gain.
    pub sharpen0: f32,
    /// Medium-scale luminance sharpening gain.
    pub sharpen1: f32,
    /// Edge-aware chroma smoothing strength; 0 disables.
    pub chroma_eps: f32,
    /// Geometric mean luminance of the scene, estimated by the analyzer.
    pub scene_luminance: f32,
    /// Global sensor noise sigma, estimated by the analyzer.
    pub noise_sigma: f32,
    /// JPEG quality in [1, 100].
    pub jpeg_quality: u8,
    /// Wavelet shrinkage strength of the spatial denoiser.
    pub spatial_denoise_aggressiveness: f32,
    pub flipped: bool,
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            tint: 0.0,
            exposure: 0.0,
            shadows: 1.0,
            blacks: 0.0,
            white_point: 1.0,
            gamma: 2.2,
            contrast: 0.5,
            saturation: 1.0,
            blue_saturation: 1.0,
            green_saturation: 1.0,
            tonemap_variance: 0.25,
            sharpen0: 0.0,
            sharpen1: 0.0,
            chroma_eps: 8.0,
            scene_luminance: 0.0,
            noise_sigma: 0.0,
            jpeg_quality: 95,
            spatial_denoise_aggressiveness: 1.0,
            flipped: false,
        }
    }
}

impl PostProcessSettings {
    /// Validate configuration parameters.
    ///
    /// # Panics
    ///
    /// Panics on programmer error: out-of-range values that no estimator or
    /// container should ever produce.
    pub fn validate(&self) {
        assert!(
            (1..=100).contains(&self.jpeg_quality),
            "JPEG quality must be in 1..=100"
        );
        assert!(self.gamma > 0.0, "Gamma must be positive");
        assert!(self.shadows >= 1.0, "Shadows gain must be >= 1");
        assert!(
            (0.0..=1.0).contains(&self.blacks),
            "Blacks must be in [0, 1]"
        );
        assert!(
            (0.0..=1.0).contains(&self.white_point),
            "White point must be in [0, 1]"
        );
        assert!(
            self.spatial_denoise_aggressiveness >= 0.0,
            "Spatial denoise aggressiveness must be non-negative"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        PostProcessSettings::default().validate();
    }

    #[test]
    #[should_panic(expected = "JPEG quality must be in 1..=100")]
    fn test_invalid_jpeg_quality_panics() {
        let settings = PostProcessSettings {
            jpeg_quality: 0,
            ..Default::default()
        };
        settings.validate();
    }

    #[test]
    #[should_panic(expected = "White point must be in [0, 1]")]
    fn test_invalid_white_point_panics() {
        let settings = PostProcessSettings {
            white_point: 1.5,
            ..Default::default()
        };
        settings.validate();
    }
}
