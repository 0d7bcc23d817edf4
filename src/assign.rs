//! Seat assignment: many anchors against many seats, at most one person per seat.
//!
//! Pass 1 assigns anchors that fall inside a seat polygon. Where polygons
//! overlap, the untaken candidate with the nearest center wins.
//!
//! Pass 2 gives the anchors left over a second chance: seats whose center lies
//! within a distance gate are tried nearest first, and the first untaken one
//! whose bounding rectangle overlaps the person box at all (IoU floor) takes
//! the person.
//!
//! Assignment is greedy and first-come: once a seat is taken in a frame it is
//! never reassigned. Anchors matching nothing are dropped.

use std::collections::BTreeSet;

use crate::detect::Detection;
use crate::geometry::{bounding_rect, iou, point_in_polygon, FrameSize, Point};
use crate::occupancy::OccupancyMap;
use crate::seats::{SeatId, SeatLayout};

/// Distance gate for pass 2, as a fraction of the frame's longest side.
pub const DEFAULT_GATE_RATIO: f64 = 0.06;
/// Minimum box overlap for a pass-2 assignment.
pub const DEFAULT_MIN_IOU: f32 = 0.02;

/// Result of assigning one frame's detections.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub occupancy: OccupancyMap,
    /// Seat taken by each detection, aligned with the input detections.
    pub seats: Vec<Option<SeatId>>,
}

impl Assignment {
    pub fn assigned_count(&self) -> usize {
        self.seats.iter().filter(|seat| seat.is_some()).count()
    }
}

pub struct SeatAssigner<'a> {
    layout: &'a SeatLayout,
    gate_px: f64,
    min_iou: f32,
}

impl<'a> SeatAssigner<'a> {
    pub fn new(layout: &'a SeatLayout, frame: FrameSize) -> Self {
        Self {
            layout,
            gate_px: f64::from(frame.longest_side()) * DEFAULT_GATE_RATIO,
            min_iou: DEFAULT_MIN_IOU,
        }
    }

    /// Assign detections, given their anchors, to seats.
    ///
    /// `anchors` must be aligned with `detections`.
    pub fn assign(&self, detections: &[Detection], anchors: &[Point]) -> Assignment {
        debug_assert_eq!(detections.len(), anchors.len());

        let mut seats: Vec<Option<SeatId>> = vec![None; anchors.len()];
        let mut taken: BTreeSet<SeatId> = BTreeSet::new();

        for (slot, anchor) in seats.iter_mut().zip(anchors) {
            if let Some(seat) = self.by_containment(*anchor, &taken) {
                taken.insert(seat);
                *slot = Some(seat);
            }
        }

        for ((slot, anchor), detection) in seats.iter_mut().zip(anchors).zip(detections) {
            if slot.is_some() {
                continue;
            }
            if let Some(seat) = self.by_proximity(*anchor, detection, &taken) {
                taken.insert(seat);
                *slot = Some(seat);
            }
        }

        let mut occupancy = OccupancyMap::vacant(self.layout.seat_ids());
        for seat in &taken {
            occupancy.set(*seat, true);
        }

        Assignment { occupancy, seats }
    }

    fn by_containment(&self, anchor: Point, taken: &BTreeSet<SeatId>) -> Option<SeatId> {
        let candidates: Vec<(SeatId, Point)> = self
            .layout
            .seats()
            .filter(|(_, polygon, _)| point_in_polygon(anchor, polygon))
            .map(|(seat, _, center)| (seat, center))
            .collect();

        match candidates.as_slice() {
            [] => None,
            [(seat, _)] => (!taken.contains(seat)).then_some(*seat),
            _ => {
                // Seats come in id order and only a strictly nearer center
                // replaces the best, so equidistant candidates go to the lower id.
                let mut best: Option<(SeatId, i64)> = None;
                for (seat, center) in &candidates {
                    if taken.contains(seat) {
                        continue;
                    }
                    let d = anchor.distance_sq(*center);
                    if best.map_or(true, |(_, best_d)| d < best_d) {
                        best = Some((*seat, d));
                    }
                }
                best.map(|(seat, _)| seat)
            }
        }
    }

    fn by_proximity(
        &self,
        anchor: Point,
        detection: &Detection,
        taken: &BTreeSet<SeatId>,
    ) -> Option<SeatId> {
        let mut order: Vec<(SeatId, Point)> = self
            .layout
            .seats()
            .map(|(seat, _, center)| (seat, center))
            .collect();
        // Stable sort: equidistant seats stay in id order.
        order.sort_by_key(|(_, center)| anchor.distance_sq(*center));

        for (seat, center) in order {
            if anchor.distance(center) > self.gate_px {
                break;
            }
            if taken.contains(&seat) {
                continue;
            }
            let Some(polygon) = self.layout.polygon(seat) else {
                continue;
            };
            if iou(&detection.bbox, &bounding_rect(polygon)) >= self.min_iou {
                return Some(seat);
            }
        }
        None
    }
}

/// Convenience: anchors, assignment and occupancy for one frame's detections.
pub fn assign_detections(
    layout: &SeatLayout,
    frame: FrameSize,
    detections: &[Detection],
) -> Assignment {
    let anchors = crate::anchor::extract_anchors(detections);
    SeatAssigner::new(layout, frame).assign(detections, &anchors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BoundingBox, Polygon};
    use std::collections::BTreeMap;

    const FRAME: FrameSize = FrameSize::new(1000, 500);

    fn square(x0: i32, y0: i32, x1: i32, y1: i32) -> Polygon {
        Polygon::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    fn layout(seats: Vec<(u32, Polygon)>) -> SeatLayout {
        SeatLayout::new(
            seats
                .into_iter()
                .map(|(id, poly)| (SeatId::new(id), poly))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    /// Box whose bottom-middle lands on (x, y).
    fn person_at(x: f32, y: f32) -> Detection {
        Detection::new(BoundingBox::new(x - 20.0, y - 80.0, x + 20.0, y), 0.9)
    }

    fn seat(n: u32) -> Option<SeatId> {
        Some(SeatId::new(n))
    }

    #[test]
    fn empty_frame_marks_every_seat_vacant() {
        let layout = layout(vec![(1, square(0, 0, 10, 10)), (2, square(20, 0, 30, 10))]);
        let result = assign_detections(&layout, FRAME, &[]);
        assert_eq!(result.occupancy.len(), 2);
        assert_eq!(result.occupancy.occupied_count(), 0);
        assert!(result.seats.is_empty());
    }

    #[test]
    fn anchor_inside_single_seat_is_assigned() {
        let layout = layout(vec![(1, square(0, 0, 100, 100)), (2, square(200, 0, 300, 100))]);
        let result = assign_detections(&layout, FRAME, &[person_at(250.0, 50.0)]);
        assert_eq!(result.seats, vec![seat(2)]);
        assert_eq!(result.occupancy.get(SeatId::new(1)), Some(false));
        assert_eq!(result.occupancy.get(SeatId::new(2)), Some(true));
    }

    #[test]
    fn overlapping_seats_go_to_nearest_center() {
        // Seat 1 center (50, 50), seat 2 center (110, 50); overlap x 80..=100.
        let layout = layout(vec![(1, square(0, 0, 100, 100)), (2, square(80, 0, 140, 100))]);
        let result = assign_detections(&layout, FRAME, &[person_at(95.0, 50.0)]);
        assert_eq!(result.seats, vec![seat(2)]);

        let result = assign_detections(&layout, FRAME, &[person_at(85.0, 50.0)]);
        assert_eq!(result.seats, vec![seat(2)]);

        // Equidistant: the lower seat id wins the tie.
        let result = assign_detections(&layout, FRAME, &[person_at(80.0, 50.0)]);
        assert_eq!(result.seats, vec![seat(1)]);
    }

    #[test]
    fn overlapping_seats_skip_taken_candidate() {
        let layout = layout(vec![(1, square(0, 0, 100, 100)), (2, square(80, 0, 140, 100))]);
        let dets = [person_at(120.0, 50.0), person_at(95.0, 50.0)];
        let result = assign_detections(&layout, FRAME, &dets);
        assert_eq!(result.seats, vec![seat(2), seat(1)]);
        assert_eq!(result.occupancy.occupied_count(), 2);
    }

    #[test]
    fn second_anchor_in_taken_single_seat_stays_unassigned() {
        // Gate is 1000 * 0.06 = 60 px; seat 2 is far beyond it.
        let layout = layout(vec![(1, square(0, 0, 100, 100)), (2, square(600, 0, 700, 100))]);
        let dets = [person_at(40.0, 50.0), person_at(60.0, 50.0)];
        let result = assign_detections(&layout, FRAME, &dets);
        assert_eq!(result.seats, vec![seat(1), None]);
        assert_eq!(result.assigned_count(), 1);
    }

    #[test]
    fn near_miss_is_recovered_by_proximity_and_overlap() {
        // Anchor just below seat 1 (center (50, 50)), distance 55 <= 60.
        let layout = layout(vec![(1, square(0, 0, 100, 100))]);
        let result = assign_detections(&layout, FRAME, &[person_at(50.0, 105.0)]);
        assert_eq!(result.seats, vec![seat(1)]);
    }

    #[test]
    fn proximity_respects_distance_gate() {
        let layout = layout(vec![(1, square(0, 0, 100, 100))]);
        // Distance from (50, 50) to (50, 115) is 65 > 60.
        let result = assign_detections(&layout, FRAME, &[person_at(50.0, 115.0)]);
        assert_eq!(result.seats, vec![None]);
        assert_eq!(result.occupancy.get(SeatId::new(1)), Some(false));
    }

    #[test]
    fn proximity_requires_box_overlap() {
        let layout = layout(vec![(1, square(0, 0, 100, 100))]);
        // Anchor within the gate but the person box is a sliver below the seat.
        let det = Detection::new(BoundingBox::new(45.0, 102.0, 55.0, 104.0), 0.9);
        let anchors = vec![Point::new(50, 104)];
        let result = SeatAssigner::new(&layout, FRAME).assign(&[det], &anchors);
        assert_eq!(result.seats, vec![None]);
    }

    #[test]
    fn proximity_skips_taken_seat_for_next_nearest() {
        let layout = layout(vec![(1, square(0, 0, 100, 100)), (2, square(100, 0, 200, 100))]);
        // First person sits in seat 1; second misses both polygons, nearest to seat 1.
        // A 2000 px frame widens the gate to 120 px so both centers qualify.
        let dets = [person_at(50.0, 50.0), person_at(95.0, 110.0)];
        let result = assign_detections(&layout, FrameSize::new(2000, 1000), &dets);
        assert_eq!(result.seats, vec![seat(1), seat(2)]);
    }

    #[test]
    fn proximity_tie_goes_to_lower_seat_id() {
        // Anchor (110, 50) sits in the gap, 60 px from both centers.
        let layout = layout(vec![(2, square(120, 0, 220, 100)), (1, square(0, 0, 100, 100))]);
        let result =
            assign_detections(&layout, FrameSize::new(2000, 1000), &[person_at(110.0, 50.0)]);
        assert_eq!(result.seats, vec![seat(1)]);
    }

    #[test]
    fn containment_beats_earlier_proximity_candidate() {
        let layout = layout(vec![(1, square(0, 0, 100, 100))]);
        // Detection 0 only qualifies by proximity; detection 1 is inside.
        let dets = [person_at(50.0, 105.0), person_at(50.0, 50.0)];
        let result = assign_detections(&layout, FRAME, &dets);
        assert_eq!(result.seats, vec![None, seat(1)]);
    }

    #[test]
    fn no_seat_is_assigned_twice() {
        let layout = layout(vec![
            (1, square(0, 0, 100, 100)),
            (2, square(80, 0, 180, 100)),
            (3, square(160, 0, 260, 100)),
        ]);
        let dets: Vec<Detection> = (0..12)
            .map(|i| person_at(20.0 * i as f32, 40.0 + 5.0 * (i % 4) as f32))
            .collect();
        let result = assign_detections(&layout, FRAME, &dets);

        let assigned: Vec<SeatId> = result.seats.iter().flatten().copied().collect();
        let unique: BTreeSet<SeatId> = assigned.iter().copied().collect();
        assert_eq!(assigned.len(), unique.len());
        assert_eq!(result.occupancy.len(), 3);
        assert_eq!(result.occupancy.occupied_count(), unique.len());
    }
}
