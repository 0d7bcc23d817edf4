//! Occupancy anchors: one seat-determining point per detected person.
//!
//! A seated person's hips sit over the seat cushion, so the hip midpoint is the
//! preferred anchor. Without a usable hip pair the bottom-middle of the person
//! box stands in for it.

use crate::detect::{Detection, LEFT_HIP, RIGHT_HIP};
use crate::geometry::Point;

/// Anchor for a single detection.
pub fn anchor_for(detection: &Detection) -> Point {
    match (detection.keypoint(LEFT_HIP), detection.keypoint(RIGHT_HIP)) {
        (Some(left), Some(right)) if left.is_detected() && right.is_detected() => Point::new(
            ((left.x + right.x) / 2.0) as i32,
            ((left.y + right.y) / 2.0) as i32,
        ),
        _ => detection.bbox.bottom_mid(),
    }
}

/// Anchors aligned index-for-index with `detections`.
pub fn extract_anchors(detections: &[Detection]) -> Vec<Point> {
    detections.iter().map(anchor_for).collect()
}
