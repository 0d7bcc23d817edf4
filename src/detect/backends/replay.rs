use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::{Context, Result};

use crate::detect::backend::{DetectionCapability, DetectorBackend};
use crate::detect::result::Detection;

/// Replays recorded detections, one JSON array per line, one line per call.
///
/// Each line holds the detections for one processed frame, e.g.
/// `[{"bbox": [10, 20, 110, 220], "confidence": 0.9, "keypoints": [[x, y], ...]}]`.
/// Blank lines are frames with nobody in them. Once the file is exhausted every
/// further frame is empty.
pub struct ReplayBackend {
    lines: Option<Lines<BufReader<File>>>,
    line_no: u64,
}

impl ReplayBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open detection replay {}", path.display()))?;
        log::info!("ReplayBackend: replaying detections from {}", path.display());
        Ok(Self {
            lines: Some(BufReader::new(file).lines()),
            line_no: 0,
        })
    }

    /// A replay with nothing recorded: every frame is empty.
    pub fn empty() -> Self {
        Self {
            lines: None,
            line_no: 0,
        }
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        match lines.next() {
            Some(line) => {
                self.line_no += 1;
                Ok(Some(line.context("failed to read detection replay")?))
            }
            None => {
                log::info!(
                    "ReplayBackend: replay exhausted after {} frames",
                    self.line_no
                );
                self.lines = None;
                Ok(None)
            }
        }
    }
}

impl DetectorBackend for ReplayBackend {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        matches!(
            capability,
            DetectionCapability::PersonBoxes | DetectionCapability::Pose
        )
    }

    fn detect(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        let Some(line) = self.next_line()? else {
            return Ok(Vec::new());
        };
        if line.trim().is_empty() {
            return Ok(Vec::new());
        }
        let detections: Vec<Detection> = serde_json::from_str(&line)
            .with_context(|| format!("invalid detection replay line {}", self.line_no))?;
        Ok(detections
            .into_iter()
            .filter(|d| d.confidence >= confidence)
            .collect())
    }
}
