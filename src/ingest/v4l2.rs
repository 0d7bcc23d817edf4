//! Live camera source using V4L2.
//!
//! Captures RGB24 frames from a local device node such as `/dev/video0`.
//! Cameras carry no presentation time and no nominal rate, so frames are
//! timed by the wall clock.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

/// Capture size requested from the device; the driver may pick another.
const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;

pub struct V4l2CameraSource {
    config: SourceConfig,
    device: String,
    state: Option<CameraState>,
    width: u32,
    height: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct CameraState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2CameraSource {
    /// The device is not opened until `connect`.
    pub fn new(config: SourceConfig, device: String) -> Self {
        Self {
            config,
            device,
            state: None,
            width: REQUESTED_WIDTH,
            height: REQUESTED_HEIGHT,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.target_fps == 0 {
            2_000
        } else {
            (1000 / self.config.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2CameraSource {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device)
            .with_context(|| format!("open camera {}", self.device))?;
        let mut format = device.format().context("read camera format")?;
        format.width = REQUESTED_WIDTH;
        format.height = REQUESTED_HEIGHT;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2CameraSource: failed to set format on {}: {}",
                    self.device,
                    err
                );
                device
                    .format()
                    .context("read camera format after set failure")?
            }
        };
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(anyhow!(
                "camera {} does not deliver RGB24 (negotiated {})",
                self.device,
                format.fourcc
            ));
        }

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2CameraSource: failed to set fps on {}: {}",
                    self.device,
                    err
                );
            }
        }

        self.width = format.width;
        self.height = format.height;
        self.last_error = None;

        let state = CameraStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create camera buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);

        log::info!(
            "V4l2CameraSource: connected to {} ({}x{})",
            self.device,
            self.width,
            self.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let expected = self.frame_len();
        let state = self.state.as_mut().context("camera not connected")?;
        let captured = state.with_mut(|fields| match fields.stream.next() {
            Ok((buf, _meta)) if buf.len() >= expected => Ok(buf[..expected].to_vec()),
            Ok((buf, _meta)) => Err(anyhow!(
                "short camera buffer: {} bytes, want {}",
                buf.len(),
                expected
            )),
            Err(err) => Err(anyhow::Error::new(err).context("capture camera frame")),
        });
        let pixels = captured.map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(Frame::new(
            pixels,
            self.width,
            self.height,
            self.frame_count,
        )))
    }

    fn fps(&self) -> Option<f64> {
        None
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.device.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> V4l2CameraSource {
        let config = SourceConfig {
            uri: "0".to_string(),
            target_fps: 10,
        };
        V4l2CameraSource::new(config, "/dev/video0".to_string())
    }

    #[test]
    fn camera_is_wall_clocked_and_not_still() {
        let source = camera();
        assert_eq!(source.fps(), None);
        assert!(!source.is_still());
        assert!(source.is_healthy());
        assert_eq!(source.stats().uri, "/dev/video0");
    }

    #[test]
    fn reading_before_connect_is_an_error() {
        let mut source = camera();
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn missing_device_fails_to_connect() {
        let mut source = V4l2CameraSource::new(
            SourceConfig::default(),
            "/dev/video-does-not-exist".to_string(),
        );
        assert!(source.connect().is_err());
    }
}
