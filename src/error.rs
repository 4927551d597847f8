use thiserror::Error;

use crate::frame::PixelFormat;

/// Errors surfaced by the processing pipeline.
///
/// The orchestrator does not recover from any of these; they are forwarded
/// to the progress listener and abort the run.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no frames found")]
    NoFrames,

    #[error("unsupported pixel format: {0:?}")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("invalid downscale factor: {0}")]
    InvalidDownscale(usize),

    #[error("lens shading map must have 4 planes of identical dimensions")]
    InvalidShadingMap,

    #[error("camera white balance vector is zero")]
    ZeroWhiteBalance,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("container: {0}")]
    Container(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image encode failed: {0}")]
    Encode(String),

    #[error("external writer: {0}")]
    ExternalWriter(String),
}

pub type Result<T> = std::result::Result<T, ProcessError>;
