//! Decoded frames and frame timing.
//!
//! - `Frame`: one decoded RGB frame with its 1-based number in the stream and
//!   the decoder's presentation time when the source knows it.
//! - `FrameClock`: turns frames into stream-relative seconds for the debounce.

use std::time::Instant;

use crate::geometry::FrameSize;

/// One decoded RGB24 frame.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based position in the stream, counting frames skipped by the stride.
    pub number: u64,
    /// Presentation time in seconds, when the container provides one.
    pub presentation_secs: Option<f64>,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, number: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            number,
            presentation_secs: None,
        }
    }

    pub fn with_presentation_secs(mut self, secs: f64) -> Self {
        self.presentation_secs = Some(secs);
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }
}

/// Stream-relative frame time.
///
/// Presentation time wins when positive; otherwise the frame number over the
/// nominal frame rate; otherwise wall-clock time since the clock started.
pub struct FrameClock {
    fps: Option<f64>,
    started: Instant,
}

impl FrameClock {
    pub fn new(fps: Option<f64>) -> Self {
        Self {
            fps: fps.filter(|fps| *fps > 0.0 && fps.is_finite()),
            started: Instant::now(),
        }
    }

    pub fn timestamp(&self, frame: &Frame) -> f64 {
        if let Some(pts) = frame.presentation_secs.filter(|pts| *pts > 0.0) {
            return pts;
        }
        if let Some(fps) = self.fps {
            return frame.number.saturating_sub(1) as f64 / fps;
        }
        self.started.elapsed().as_secs_f64()
    }
}
