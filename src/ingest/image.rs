//! Still-image and image-sequence frame source.
//!
//! A single image file yields exactly one frame and reports itself as still,
//! which switches the occupancy loop to immediate (undebounced) output. A
//! directory yields its images in file-name order as a frame sequence timed
//! by `target_fps`.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{is_image_path, FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

pub struct ImageSource {
    config: SourceConfig,
    paths: Vec<PathBuf>,
    still: bool,
    cursor: usize,
    connected: bool,
    last_error: Option<String>,
}

impl ImageSource {
    pub fn open(config: SourceConfig) -> Result<Self> {
        let root = PathBuf::from(config.uri.trim());
        let (paths, still) = if root.is_dir() {
            (list_images(&root)?, false)
        } else {
            (vec![root], true)
        };
        if paths.is_empty() {
            return Err(anyhow!("no images found in {}", config.uri));
        }
        Ok(Self {
            config,
            paths,
            still,
            cursor: 0,
            connected: false,
            last_error: None,
        })
    }
}

impl FrameSource for ImageSource {
    fn connect(&mut self) -> Result<()> {
        // A still image that cannot be decoded is a startup failure, not an empty stream.
        if self.still {
            let path = &self.paths[0];
            if !path.is_file() {
                return Err(anyhow!("cannot read image {}", path.display()));
            }
        }
        self.connected = true;
        log::info!(
            "ImageSource: connected to {} ({} image(s))",
            self.config.uri,
            self.paths.len()
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        let decoded = image::open(path).with_context(|| format!("decode image {}", path.display()));
        let decoded = match decoded {
            Ok(decoded) => decoded.to_rgb8(),
            Err(err) => {
                self.last_error = Some(err.to_string());
                return Err(err);
            }
        };
        self.cursor += 1;
        let (width, height) = decoded.dimensions();
        Ok(Some(Frame::new(
            decoded.into_raw(),
            width,
            height,
            self.cursor as u64,
        )))
    }

    fn fps(&self) -> Option<f64> {
        if self.still || self.config.target_fps == 0 {
            return None;
        }
        Some(f64::from(self.config.target_fps))
    }

    fn is_still(&self) -> bool {
        self.still
    }

    fn is_healthy(&self) -> bool {
        self.connected && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.cursor as u64,
            uri: self.config.uri.clone(),
        }
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.to_str().is_some_and(is_image_path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
