//! Local video file source using FFmpeg.
//!
//! Decodes the best video stream to RGB24 in memory. Each frame carries its
//! presentation time in seconds when the container provides one; the stream's
//! average frame rate is the fallback timing.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::{FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

pub struct FfmpegFileSource {
    config: SourceConfig,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: f64,
    fps: Option<f64>,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    eof_sent: bool,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegFileSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&config.uri)
            .with_context(|| format!("failed to open video '{}' with ffmpeg", config.uri))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let time_base = f64::from(input_stream.time_base());
        let rate = f64::from(input_stream.avg_frame_rate());
        let fps = (rate.is_finite() && rate > 0.0).then_some(rate);
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            config,
            input,
            stream_index,
            time_base,
            fps,
            decoder,
            scaler,
            eof_sent: false,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    fn receive(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());

        let mut frame = Frame::new(pixels, width, height, self.frame_count);
        if let Some(pts) = decoded.timestamp().or_else(|| decoded.pts()) {
            frame = frame.with_presentation_secs(pts as f64 * self.time_base);
        }
        Ok(Some(frame))
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

impl FrameSource for FfmpegFileSource {
    fn connect(&mut self) -> Result<()> {
        self.connected_at = Some(Instant::now());
        log::info!(
            "FfmpegFileSource: connected to {} (fps {:?})",
            self.config.uri,
            self.fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let stream_index = self.stream_index;
            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == stream_index)
                .map(|(_, packet)| packet);

            let sent = match packet {
                Some(packet) => self.decoder.send_packet(&packet),
                None => {
                    self.eof_sent = true;
                    self.decoder.send_eof()
                }
            };
            if let Err(err) = sent {
                self.last_error = Some(err.to_string());
                return Err(err).context("send packet to ffmpeg decoder");
            }
        }
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.config.uri.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
