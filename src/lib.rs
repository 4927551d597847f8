//! Burstlight - burst RAW fusion and tone-mapping pipeline.
//!
//! This library fuses a burst of RAW sensor exposures of the same scene
//! into a single low-noise linear image, then tone-maps it into a
//! display-referred sRGB output:
//! - Bayer deinterleaving with edge padding for the wavelet pyramid
//! - Six-level wavelet decomposition with per-level noise estimation
//! - Optical-flow-guided temporal fusion of the burst into the reference
//! - Wavelet shrinkage and reconstruction into an expanded linear range
//! - Scene analysis (shadows, blacks, white point, noise)
//! - Tone-mapping postprocess and JPEG/DNG/EXIF output preparation
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use burstlight::process;
//!
//! // Container, listener and writers are caller-provided collaborators.
//! process(&container, Path::new("out.jpg"), &listener, None, None);
//! ```

mod color;
pub(crate) mod common;
mod container;
mod deinterleave;
mod denoise;
mod error;
mod flow;
mod frame;
pub(crate) mod math;
mod pipeline;
mod postprocess;
mod scene;
mod wavelet;

#[cfg(test)]
pub mod testing;

// ============================================================================
// Buffers and frame model
// ============================================================================

pub use common::Buffer2;
pub use frame::{
    BufferGuard, NativeBuffer, PixelFormat, PostProcessSettings, RawCameraMetadata, RawData,
    RawImageBuffer, RawImageMetadata, ScreenOrientation, SensorArrangement,
};

// ============================================================================
// Errors and external interfaces
// ============================================================================

pub use container::{FrameContainer, ProgressListener};
pub use error::{ProcessError, Result};

// ============================================================================
// Color profile
// ============================================================================

pub use color::{create_srgb_matrix, CameraProfile, Illuminant, Temperature, WhiteBalance};

// ============================================================================
// Denoiser stages
// ============================================================================

pub use deinterleave::{deinterleave, padded_extent, DeinterleaveOptions};
pub use denoise::{denoise, fuse_pyramids, select_fuse_weights, DenoiseOutput, FuseWeights};
pub use flow::{compute_flow, flow_std_dev, FlowConfig, FlowField};
pub use wavelet::{
    estimate_noise, forward_transform, inverse_transform, plane_to_f32, InverseParams,
    WaveletLevel, WaveletPyramid, DENOISE_LEVELS, EXPANDED_RANGE,
};

// ============================================================================
// Scene analysis
// ============================================================================

pub use scene::{
    estimate_basic_settings, estimate_exposure_compensation, estimate_noise_sigma,
    estimate_settings, estimate_shadows, measure_sharpness,
};

// ============================================================================
// Postprocess and orchestration
// ============================================================================

pub use pipeline::{
    base_orientation, build_raw_image, dng_illuminant_code, exif_orientation, float_to_rational,
    process, reorder_to_rggb, DngImage, DngOrientation, DngWriter, ExifMetadata, ExifWriter,
    GAIN_MAP_OFFSETS,
};
pub use postprocess::{create_preview, postprocess, PreviewImage};
