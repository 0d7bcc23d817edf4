mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{DetectionCapability, DetectorBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractPoseBackend;
pub use backends::ReplayBackend;
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{Detection, Keypoint, COCO_KEYPOINT_COUNT, LEFT_HIP, RIGHT_HIP};
