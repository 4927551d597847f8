//! Shared test fixtures: synthetic frames, an in-memory container and
//! recording doubles for the external interfaces.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::container::{FrameContainer, ProgressListener};
use crate::frame::{
    NativeBuffer, PixelFormat, PostProcessSettings, RawCameraMetadata, RawImageBuffer,
    RawImageMetadata,
};
use crate::pipeline::{DngImage, DngWriter, ExifMetadata, ExifWriter};

pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .try_init();
    });
}

// ============================================================================
// Synthetic frames
// ============================================================================

/// Camera with a 10-bit sensor and neutral color calibration.
pub fn test_camera() -> RawCameraMetadata {
    RawCameraMetadata {
        black_level: [64.0; 4],
        white_level: 1023.0,
        ..Default::default()
    }
}

/// Pack per-pixel sensor values into a Raw16 frame.
pub fn raw16_frame(
    width: usize,
    height: usize,
    metadata: RawImageMetadata,
    value: impl Fn(usize, usize) -> u16,
) -> RawImageBuffer {
    let mut bytes = Vec::with_capacity(width * height * 2);
    for y in 0..height {
        for x in 0..width {
            bytes.extend_from_slice(&value(x, y).to_le_bytes());
        }
    }

    RawImageBuffer {
        width,
        height,
        row_stride: width * 2,
        pixel_format: PixelFormat::Raw16,
        data: NativeBuffer::new(bytes),
        metadata,
    }
}

/// A frame with one constant value per CFA position.
pub fn tiled_frame(width: usize, height: usize, tile: [u16; 4]) -> RawImageBuffer {
    raw16_frame(width, height, RawImageMetadata::default(), move |x, y| {
        tile[(y % 2) * 2 + x % 2]
    })
}

/// Smooth gradient scene plus seeded uniform noise.
pub fn noisy_frame(width: usize, height: usize, noise_amplitude: f64, seed: u64) -> RawImageBuffer {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut values = vec![0u16; width * height];
    for y in 0..height {
        for x in 0..width {
            let base = 320.0
                + 120.0 * ((x as f64) * 0.02).sin()
                + 90.0 * ((y as f64) * 0.015).cos();
            let noise = rng.gen_range(-noise_amplitude..=noise_amplitude);
            values[y * width + x] = (base + noise).round().clamp(64.0, 1023.0) as u16;
        }
    }
    raw16_frame(width, height, RawImageMetadata::default(), move |x, y| {
        values[y * width + x]
    })
}

// ============================================================================
// In-memory container
// ============================================================================

pub struct MemoryContainer {
    frames: Vec<(String, Arc<RawImageBuffer>)>,
    reference: String,
    camera: RawCameraMetadata,
    settings: PostProcessSettings,
    dng: bool,
    pub released: Mutex<Vec<String>>,
}

impl MemoryContainer {
    pub fn new(frames: Vec<RawImageBuffer>, camera: RawCameraMetadata) -> Self {
        let frames: Vec<(String, Arc<RawImageBuffer>)> = frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| (format!("frame{i}"), Arc::new(f)))
            .collect();
        let reference = frames
            .first()
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| "frame0".into());

        Self {
            frames,
            reference,
            camera,
            settings: PostProcessSettings::default(),
            dng: false,
            released: Mutex::new(Vec::new()),
        }
    }

    pub fn with_settings(mut self, settings: PostProcessSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_dng(mut self) -> Self {
        self.dng = true;
        self
    }
}

impl FrameContainer for MemoryContainer {
    fn frames(&self) -> Vec<String> {
        self.frames.iter().map(|(id, _)| id.clone()).collect()
    }

    fn reference_frame(&self) -> String {
        self.reference.clone()
    }

    fn frame(&self, id: &str) -> anyhow::Result<Arc<RawImageBuffer>> {
        self.frames
            .iter()
            .find(|(fid, _)| fid == id)
            .map(|(_, f)| f.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown frame '{id}'"))
    }

    fn load_frame(&self, id: &str) -> anyhow::Result<Arc<RawImageBuffer>> {
        self.frame(id)
    }

    fn release_frame(&self, id: &str) {
        self.released
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id.to_string());
    }

    fn camera_metadata(&self) -> &RawCameraMetadata {
        &self.camera
    }

    fn post_process_settings(&self) -> PostProcessSettings {
        self.settings.clone()
    }

    fn write_dng(&self) -> bool {
        self.dng
    }
}

// ============================================================================
// Recording doubles
// ============================================================================

#[derive(Default)]
pub struct RecordingListener {
    pub progress: Mutex<Vec<u32>>,
    pub completed: Mutex<bool>,
    pub error: Mutex<Option<String>>,
}

impl RecordingListener {
    pub fn progress_values(&self) -> Vec<u32> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_completed(&self) -> bool {
        *self.completed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ProgressListener for RecordingListener {
    fn on_progress_update(&self, progress: u32) {
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(progress);
    }

    fn on_completed(&self) {
        *self.completed.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }

    fn on_error(&self, message: &str) {
        *self.error.lock().unwrap_or_else(|e| e.into_inner()) = Some(message.to_string());
    }
}

#[derive(Default)]
pub struct RecordingDngWriter {
    pub captured: Mutex<Option<(DngImage, PathBuf)>>,
}

impl DngWriter for RecordingDngWriter {
    fn write_dng(
        &self,
        image: &DngImage,
        _camera: &RawCameraMetadata,
        _metadata: &RawImageMetadata,
        path: &Path,
    ) -> anyhow::Result<()> {
        *self.captured.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((image.clone(), path.to_path_buf()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingExifWriter {
    pub captured: Mutex<Option<(ExifMetadata, usize, PathBuf)>>,
}

impl ExifWriter for RecordingExifWriter {
    fn embed(
        &self,
        path: &Path,
        exif: &ExifMetadata,
        thumbnail_jpeg: &[u8],
    ) -> anyhow::Result<()> {
        *self.captured.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((exif.clone(), thumbnail_jpeg.len(), path.to_path_buf()));
        Ok(())
    }
}

/// Unique temporary output path for a test.
pub fn test_output_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("burstlight-tests");
    std::fs::create_dir_all(&dir).expect("create test output dir");
    dir.join(format!("{}-{name}", std::process::id()))
}
