//! Seat Occupancy
//!
//! Turns per-frame person detections from a fixed cabin camera into debounced,
//! per-seat occupancy, and persists each confirmed change to a seat record
//! store.
//!
//! # Architecture
//!
//! Frame → detector → anchors → seat assignment → per-frame occupancy →
//! stability tracker → confirmed map → persistence gateway.
//!
//! The loop is single-threaded and pull-based. The persistence gateway owns
//! every process-lifetime cache; nothing is global.
//!
//! # Module Structure
//!
//! - `geometry`: points, boxes, polygons, centroid / containment / IoU
//! - `seats`: seat identifiers, seat polygon documents, fitted layouts
//! - `detect`: typed detections and detector backends
//! - `anchor`, `assign`, `occupancy`: one frame's detections to per-seat occupancy
//! - `stability`: the debounce state machine
//! - `frame`, `ingest`: frames, frame timing, and frame sources
//! - `storage`, `gateway`: seat record stores and the write path with reservation clearing
//! - `event`, `pipeline`, `config`: the process boundary and the loop that drives it

pub mod anchor;
pub mod assign;
pub mod config;
pub mod detect;
pub mod event;
pub mod frame;
pub mod gateway;
pub mod geometry;
pub mod ingest;
pub mod occupancy;
pub mod pipeline;
pub mod seats;
pub mod stability;
pub mod storage;

pub use anchor::{anchor_for, extract_anchors};
pub use assign::{assign_detections, Assignment, SeatAssigner};
pub use config::OccupancyConfig;
pub use detect::{Detection, DetectorBackend, Keypoint};
pub use event::ConfirmedEvent;
pub use frame::{Frame, FrameClock};
pub use gateway::{PersistenceGateway, WriteOutcome};
pub use geometry::{BoundingBox, FrameSize, Point, Polygon};
pub use ingest::{open_source, FrameSource, SourceConfig};
pub use occupancy::OccupancyMap;
pub use pipeline::{OccupancyPipeline, PipelineSettings, RunSummary};
pub use seats::{SeatGeometry, SeatId, SeatLayout};
pub use stability::{StabilityState, StabilityTracker};
pub use storage::{
    InMemorySeatStore, SeatRecord, SeatRecordRef, SeatRecordStore, SeatWrite, SectionKey,
    SqliteSeatStore,
};
