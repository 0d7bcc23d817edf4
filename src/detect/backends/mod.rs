pub mod replay;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use replay::ReplayBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractPoseBackend;
