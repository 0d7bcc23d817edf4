//! Frame ingestion sources.
//!
//! This module provides the sources the occupancy loop pulls frames from:
//! - Synthetic `stub://` streams (testing, detection replay)
//! - Still images and image-sequence directories (feature: ingest-image)
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Live V4L2 cameras, `/dev/videoN` or a bare index `N` (feature: ingest-v4l2)
//!
//! Opening or connecting a source is a startup precondition: failure there is
//! fatal. Once frames flow, `next_frame` returning `Ok(None)` or an error both
//! end the stream.

#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
#[cfg(feature = "ingest-image")]
pub mod image;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

#[cfg(feature = "ingest-file-ffmpeg")]
pub use file_ffmpeg::FfmpegFileSource;
#[cfg(feature = "ingest-image")]
pub use self::image::ImageSource;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2CameraSource;

/// Extensions treated as still images rather than video containers.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub uri: String,
}

/// Pull-based frame source.
pub trait FrameSource {
    /// Prepare the source. Failure is fatal.
    fn connect(&mut self) -> Result<()>;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Nominal frame rate, when known.
    fn fps(&self) -> Option<f64>;

    /// True when the source is a single still image.
    fn is_still(&self) -> bool {
        false
    }

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Source configuration.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://...`, a camera device, an image file or directory, or a video file path.
    pub uri: String,
    /// Nominal rate for sources without their own timing.
    pub target_fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "stub://cabin".to_string(),
            target_fps: 10,
        }
    }
}

/// Open the source named by `config.uri`.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    let uri = config.uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("frame source must not be empty"));
    }
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())?));
    }
    if uri.contains("://") {
        return Err(anyhow!(
            "frame source {} is not a local path (no URL schemes besides stub://)",
            uri
        ));
    }

    if let Some(device) = camera_device(uri) {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2CameraSource::new(config.clone(), device)));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            return Err(anyhow!(
                "camera input {} requires the ingest-v4l2 feature",
                device
            ));
        }
    }

    let path = std::path::Path::new(uri);
    if path.is_dir() || is_image_path(uri) {
        #[cfg(feature = "ingest-image")]
        {
            return Ok(Box::new(ImageSource::open(config.clone())?));
        }
        #[cfg(not(feature = "ingest-image"))]
        {
            return Err(anyhow!("image input requires the ingest-image feature"));
        }
    }

    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Box::new(FfmpegFileSource::new(config.clone())?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(anyhow!(
            "video input requires the ingest-file-ffmpeg feature"
        ))
    }
}

/// Device node for a camera source: `/dev/videoN` as given, or a bare index `N`.
pub fn camera_device(uri: &str) -> Option<String> {
    let index = uri.strip_prefix("/dev/video").unwrap_or(uri);
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("/dev/video{}", index))
}

pub fn is_image_path(path: &str) -> bool {
    std::path::Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
