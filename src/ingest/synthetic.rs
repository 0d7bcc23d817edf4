//! Synthetic `stub://` frame source.
//!
//! Produces flat gray frames with no decoder timing, so timestamps follow the
//! frame number over `target_fps`. Query parameters shape the stream:
//! `stub://cabin?frames=120&width=1280&height=720`. Without `frames` the
//! stream is unbounded and paced at `target_fps` like a live camera.

use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

pub struct SyntheticSource {
    config: SourceConfig,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let rest = config
            .uri
            .trim()
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source requires a stub:// uri"))?;

        let mut width = DEFAULT_WIDTH;
        let mut height = DEFAULT_HEIGHT;
        let mut frame_limit = None;

        if let Some((_, query)) = rest.split_once('?') {
            for pair in query.split('&').filter(|pair| !pair.is_empty()) {
                let (key, value) = pair
                    .split_once('=')
                    .ok_or_else(|| anyhow!("stub parameter '{}' must be key=value", pair))?;
                match key {
                    "frames" => {
                        frame_limit = Some(
                            value
                                .parse::<u64>()
                                .with_context(|| format!("invalid stub frames '{}'", value))?,
                        )
                    }
                    "width" => {
                        width = value
                            .parse()
                            .with_context(|| format!("invalid stub width '{}'", value))?
                    }
                    "height" => {
                        height = value
                            .parse()
                            .with_context(|| format!("invalid stub height '{}'", value))?
                    }
                    other => return Err(anyhow!("unknown stub parameter '{}'", other)),
                }
            }
        }

        if width == 0 || height == 0 {
            return Err(anyhow!("stub frame dimensions must be non-zero"));
        }

        Ok(Self {
            config,
            width,
            height,
            frame_limit,
            frame_count: 0,
            last_frame_at: None,
            connected: false,
        })
    }

    fn pace(&self) {
        if self.frame_limit.is_some() || self.config.target_fps == 0 {
            return;
        }
        let Some(last) = self.last_frame_at else {
            return;
        };
        let interval = Duration::from_secs_f64(1.0 / f64::from(self.config.target_fps));
        if let Some(remaining) = interval.checked_sub(last.elapsed()) {
            std::thread::sleep(remaining);
        }
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            self.config.uri,
            self.width,
            self.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        self.pace();
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        let pixels = vec![114u8; self.width as usize * self.height as usize * 3];
        Ok(Some(Frame::new(
            pixels,
            self.width,
            self.height,
            self.frame_count,
        )))
    }

    fn fps(&self) -> Option<f64> {
        (self.config.target_fps > 0).then(|| f64::from(self.config.target_fps))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.config.uri.clone(),
        }
    }
}
