//! External collaborator interfaces: the frame container and the progress
//! listener.

use std::sync::Arc;

use crate::frame::{PostProcessSettings, RawCameraMetadata, RawImageBuffer};

/// Abstract burst container: an ordered set of raw frames, one of which is
/// the reference, plus shared camera metadata and output settings.
///
/// Implementations are free to load lazily; [`FrameContainer::frame`] must be
/// cheap (metadata only is sufficient), while [`FrameContainer::load_frame`]
/// materializes the pixel data. The pipeline releases every frame it loads.
pub trait FrameContainer {
    /// Ordered frame identifiers.
    fn frames(&self) -> Vec<String>;

    /// Identifier of the reference frame.
    fn reference_frame(&self) -> String;

    /// Cheap access to a frame (metadata does not require pixel data).
    fn frame(&self, id: &str) -> anyhow::Result<Arc<RawImageBuffer>>;

    /// Materialize a frame for pixel access.
    fn load_frame(&self, id: &str) -> anyhow::Result<Arc<RawImageBuffer>>;

    /// Release a frame previously materialized with `load_frame`.
    fn release_frame(&self, id: &str);

    fn camera_metadata(&self) -> &RawCameraMetadata;

    fn post_process_settings(&self) -> PostProcessSettings;

    /// Whether a DNG should be written alongside the JPEG.
    fn write_dng(&self) -> bool;
}

/// Outward progress channel. There is no inward cancellation.
pub trait ProgressListener {
    fn on_progress_update(&self, progress: u32);
    fn on_completed(&self);
    fn on_error(&self, message: &str);
}
