use anyhow::Result;

use crate::detect::result::Detection;

/// What a backend can report about each person.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Person bounding boxes only.
    PersonBoxes,
    /// Person boxes with body keypoints.
    Pose,
}

/// Person detector backend.
///
/// Backends see the frame's RGB bytes for the duration of `detect` and return
/// typed detections in frame pixel coordinates. A backend error is fatal to
/// the run; callers do not retry.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Detect people in one frame, keeping those at or above `confidence`.
    fn detect(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        confidence: f32,
    ) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
