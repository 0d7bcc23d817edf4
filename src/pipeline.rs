//! The occupancy loop.
//!
//! Single-threaded and pull-based: read a frame, detect people, place anchors,
//! assign seats, debounce, and persist each confirmed map. The stop flag is
//! checked between frames, so the frame in flight always completes.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Context, Result};

use crate::assign::{assign_detections, Assignment};
use crate::detect::SharedBackend;
use crate::event::ConfirmedEvent;
use crate::frame::{Frame, FrameClock};
use crate::gateway::{PersistenceGateway, WriteOutcome};
use crate::geometry::FrameSize;
use crate::ingest::FrameSource;
use crate::occupancy::OccupancyMap;
use crate::seats::{SeatGeometry, SeatLayout};
use crate::stability::{StabilityTracker, DEFAULT_HOLD_SECS};
use crate::storage::SeatRecordStore;

const HEALTH_LOG_INTERVAL: u64 = 300;

#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub hold_secs: f64,
    /// Run detection on every n-th frame (1-based frame numbers divisible by n).
    pub frame_stride: u64,
    pub confidence: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            hold_secs: DEFAULT_HOLD_SECS,
            frame_stride: 2,
            confidence: 0.3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_read: u64,
    pub frames_processed: u64,
    pub events: u64,
    pub stopped: bool,
}

pub struct OccupancyPipeline<S: SeatRecordStore> {
    geometry: SeatGeometry,
    layout: Option<(FrameSize, SeatLayout)>,
    detector: SharedBackend,
    tracker: StabilityTracker,
    gateway: PersistenceGateway<S>,
    settings: PipelineSettings,
}

impl<S: SeatRecordStore> OccupancyPipeline<S> {
    pub fn new(
        geometry: SeatGeometry,
        detector: SharedBackend,
        gateway: PersistenceGateway<S>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            geometry,
            layout: None,
            detector,
            tracker: StabilityTracker::new(settings.hold_secs),
            gateway,
            settings,
        }
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    pub fn gateway(&self) -> &PersistenceGateway<S> {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut PersistenceGateway<S> {
        &mut self.gateway
    }

    pub fn should_process(&self, frame_number: u64) -> bool {
        frame_number % self.settings.frame_stride.max(1) == 0
    }

    /// Seat layout fitted to `size`, refitted only when the frame size changes.
    fn layout_for(&mut self, size: FrameSize) -> &SeatLayout {
        let stale = self
            .layout
            .as_ref()
            .map_or(true, |(fitted, _)| *fitted != size);
        if stale {
            log::info!(
                "fitting {} seat polygon(s) to {}x{}",
                self.geometry.seat_count(),
                size.width,
                size.height
            );
            self.layout = None;
        }
        let geometry = &self.geometry;
        &self
            .layout
            .get_or_insert_with(|| (size, geometry.fit(size)))
            .1
    }

    /// Per-frame occupancy, without debounce.
    pub fn evaluate(&mut self, frame: &Frame) -> Result<Assignment> {
        let detections = {
            let mut detector = self
                .detector
                .lock()
                .map_err(|_| anyhow!("detector lock poisoned"))?;
            detector
                .detect(
                    frame.pixels(),
                    frame.width,
                    frame.height,
                    self.settings.confidence,
                )
                .with_context(|| format!("{} failed on frame {}", detector.name(), frame.number))?
        };
        let size = frame.size();
        let layout = self.layout_for(size);
        let assignment = assign_detections(layout, size, &detections);
        log::debug!(
            "frame {}: {} detection(s), {} seated",
            frame.number,
            detections.len(),
            assignment.assigned_count()
        );
        Ok(assignment)
    }

    /// Evaluate one frame at stream time `t` and debounce it.
    ///
    /// Returns the event for a newly confirmed map, after it has been handed
    /// to the gateway.
    pub fn process_frame(&mut self, frame: &Frame, t: f64) -> Result<Option<ConfirmedEvent>> {
        let assignment = self.evaluate(frame)?;
        let Some(confirmed) = self.tracker.observe(&assignment.occupancy, t) else {
            return Ok(None);
        };
        Ok(Some(self.confirm(frame.number, t, confirmed)))
    }

    /// Evaluate a still image and confirm it immediately as frame 1 at t = 0.
    pub fn process_still(&mut self, frame: &Frame) -> Result<ConfirmedEvent> {
        let assignment = self.evaluate(frame)?;
        Ok(self.confirm(1, 0.0, assignment.occupancy))
    }

    fn confirm(&mut self, frame: u64, t: f64, seats: OccupancyMap) -> ConfirmedEvent {
        log::info!(
            "frame {} t={:.3}s confirmed: {}/{} seat(s) occupied",
            frame,
            t,
            seats.occupied_count(),
            seats.len()
        );
        match self.gateway.write(&seats) {
            WriteOutcome::Committed { seats: n, cleared } if !cleared.is_empty() => {
                log::info!("wrote {} seat(s), cleared {} reservation(s)", n, cleared.len())
            }
            WriteOutcome::Committed { seats: n, .. } => log::debug!("wrote {} seat(s)", n),
            WriteOutcome::Failed(_) | WriteOutcome::Skipped => {}
        }
        ConfirmedEvent::new(frame, t, seats)
    }

    /// Drive the loop until the source ends or `stop` is set.
    ///
    /// Failing to connect, or a source that yields no first frame, is fatal;
    /// a read error after that ends the stream. Detector errors are always fatal.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        stop: &AtomicBool,
        emit: &mut dyn FnMut(&ConfirmedEvent),
    ) -> Result<RunSummary> {
        source.connect().context("connect frame source")?;
        let clock = FrameClock::new(source.fps());
        let mut summary = RunSummary::default();

        loop {
            if stop.load(Ordering::SeqCst) {
                log::info!("stop requested after {} frame(s)", summary.frames_read);
                summary.stopped = true;
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) if summary.frames_read == 0 => {
                    return Err(anyhow!(
                        "no readable first frame from {}",
                        source.stats().uri
                    ));
                }
                Ok(None) => {
                    log::info!("end of stream after {} frame(s)", summary.frames_read);
                    break;
                }
                Err(err) if summary.frames_read == 0 => {
                    return Err(err.context("read first frame"));
                }
                Err(err) => {
                    log::warn!("frame read failed, ending stream: {:#}", err);
                    break;
                }
            };
            summary.frames_read += 1;

            if source.is_still() {
                let event = self.process_still(&frame)?;
                summary.frames_processed += 1;
                summary.events += 1;
                emit(&event);
                break;
            }

            let t = clock.timestamp(&frame);
            if self.should_process(frame.number) {
                summary.frames_processed += 1;
                if let Some(event) = self.process_frame(&frame, t)? {
                    summary.events += 1;
                    emit(&event);
                }
            }

            if summary.frames_read % HEALTH_LOG_INTERVAL == 0 {
                let stats = source.stats();
                log::info!(
                    "{}: {} frame(s) captured, healthy={}",
                    stats.uri,
                    stats.frames_captured,
                    source.is_healthy()
                );
            }
        }

        Ok(summary)
    }
}
