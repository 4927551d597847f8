//! Orchestrator: container in, denoised JPEG (plus optional DNG) out.

mod dng;
mod exif;


pub use dng::{
    base_orientation, build_raw_image, dng_illuminant_code, reorder_to_rggb, DngImage,
    DngOrientation, DngWriter, GAIN_MAP_OFFSETS,
};
pub use exif::{exif_orientation, float_to_rational, ExifMetadata, ExifWriter};

use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::container::{FrameContainer, ProgressListener};
use crate::deinterleave::padded_extent;
use crate::denoise::denoise;
use crate::error::{ProcessError, Result};
use crate::postprocess::postprocess;

// ============================================================================
// Progress
// ============================================================================

/// Maps pipeline stages onto a 0..=100 meter: denoising spreads over the
/// first 75%, postprocess jumps to 95, finalization to 100.
pub(crate) struct ProgressHelper<'a> {
    listener: &'a dyn ProgressListener,
    per_image: f64,
    current: usize,
}

impl<'a> ProgressHelper<'a> {
    pub(crate) fn new(listener: &'a dyn ProgressListener, num_images: usize) -> Self {
        // One increment per fused (channel, frame) pair.
        Self {
            listener,
            per_image: 75.0 / (num_images.max(1) * 4) as f64,
            current: 0,
        }
    }

    pub(crate) fn next_fused_image(&mut self) {
        self.current += 1;
        self.listener
            .on_progress_update((self.per_image * self.current as f64) as u32);
    }

    pub(crate) fn denoise_completed(&self) {
        self.listener.on_progress_update(75);
    }

    pub(crate) fn post_process_completed(&self) {
        self.listener.on_progress_update(95);
    }

    pub(crate) fn image_saved(&self) {
        self.listener.on_progress_update(100);
        self.listener.on_completed();
    }
}

// ============================================================================
// Process
// ============================================================================

/// Run the full pipeline. Errors are reported through the listener's
/// `on_error` and abort the run; nothing is retried.
pub fn process(
    container: &dyn FrameContainer,
    output_path: &Path,
    listener: &dyn ProgressListener,
    dng_writer: Option<&dyn DngWriter>,
    exif_writer: Option<&dyn ExifWriter>,
) {
    if let Err(e) = process_inner(container, output_path, listener, dng_writer, exif_writer) {
        listener.on_error(&e.to_string());
    }
}

fn process_inner(
    container: &dyn FrameContainer,
    output_path: &Path,
    listener: &dyn ProgressListener,
    dng_writer: Option<&dyn DngWriter>,
    exif_writer: Option<&dyn ExifWriter>,
) -> Result<()> {
    let frames = container.frames();
    if frames.is_empty() {
        return Err(ProcessError::NoFrames);
    }

    let camera = container.camera_metadata();
    let settings = container.post_process_settings();
    let reference_id = container.reference_frame();
    let reference = container
        .frame(&reference_id)
        .map_err(|e| ProcessError::Container(e.to_string()))?;

    let half_width = reference.width / 2;
    let half_height = reference.height / 2;
    let offset_x = padded_extent(half_width);
    let offset_y = padded_extent(half_height);

    info!(
        frames = frames.len(),
        width = reference.width,
        height = reference.height,
        "processing burst"
    );

    let mut progress = ProgressHelper::new(listener, frames.len());

    let denoised = {
        let mut on_fused = || progress.next_fused_image();
        denoise(container, &mut on_fused)?
    };
    progress.denoise_completed();

    if container.write_dng() {
        if let Some(writer) = dng_writer {
            let rggb = reorder_to_rggb(denoised.planes.clone(), camera.sensor_arrangement);
            let raw_image = build_raw_image(&rggb, offset_x, offset_y);
            let image = DngImage {
                data: raw_image,
                orientation: base_orientation(reference.metadata.screen_orientation),
            };

            let dng_path = output_path.with_extension("dng");
            writer
                .write_dng(&image, camera, &reference.metadata, &dng_path)
                .map_err(|e| ProcessError::ExternalWriter(e.to_string()))?;
            info!(path = %dng_path.display(), "wrote dng");
        }
    }

    let rgb = postprocess(
        &denoised.planes,
        offset_x,
        offset_y,
        &reference.metadata,
        camera,
        &settings,
    )?;
    progress.post_process_completed();

    // Encode the JPEG before any metadata is attached; a failed encode
    // must not leave a partially written output.
    let file = std::fs::File::create(output_path)?;
    let mut writer = std::io::BufWriter::new(file);
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut writer, settings.jpeg_quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| ProcessError::Encode(e.to_string()))?;
    writer.flush()?;

    // 320-wide thumbnail, aspect preserved.
    let thumb_width = 320u32;
    let thumb_height =
        ((rgb.height() as f64 / rgb.width() as f64) * thumb_width as f64).round() as u32;
    let thumbnail = image::imageops::resize(
        &rgb,
        thumb_width,
        thumb_height.max(1),
        image::imageops::FilterType::Triangle,
    );

    let mut thumbnail_jpeg = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
        std::io::Cursor::new(&mut thumbnail_jpeg),
        90,
    );
    thumbnail
        .write_with_encoder(encoder)
        .map_err(|e| ProcessError::Encode(e.to_string()))?;

    if let Some(writer) = exif_writer {
        let exif = ExifMetadata::new(&reference.metadata, camera, settings.flipped);
        writer
            .embed(output_path, &exif, &thumbnail_jpeg)
            .map_err(|e| ProcessError::ExternalWriter(e.to_string()))?;
    }

    progress.image_saved();
    info!(path = %output_path.display(), "wrote jpeg");
    Ok(())
}
