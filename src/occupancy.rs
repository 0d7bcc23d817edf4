use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::seats::SeatId;

/// Per-seat occupancy for one frame: exactly one entry per known seat.
///
/// Equality is exact: same seat set, same booleans. Serializes as
/// `{"1": true, "2": false}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OccupancyMap(BTreeMap<SeatId, bool>);

impl OccupancyMap {
    /// Every listed seat vacant.
    pub fn vacant<I: IntoIterator<Item = SeatId>>(seats: I) -> Self {
        Self(seats.into_iter().map(|seat| (seat, false)).collect())
    }

    pub fn set(&mut self, seat: SeatId, occupied: bool) {
        self.0.insert(seat, occupied);
    }

    pub fn get(&self, seat: SeatId) -> Option<bool> {
        self.0.get(&seat).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SeatId, bool)> + '_ {
        self.0.iter().map(|(seat, occupied)| (*seat, *occupied))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn occupied_count(&self) -> usize {
        self.0.values().filter(|occupied| **occupied).count()
    }
}

impl FromIterator<(SeatId, bool)> for OccupancyMap {
    fn from_iter<T: IntoIterator<Item = (SeatId, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_seat_keyed_object() {
        let mut occ = OccupancyMap::vacant([SeatId::new(2), SeatId::new(10)]);
        occ.set(SeatId::new(10), true);
        assert_eq!(serde_json::to_string(&occ).unwrap(), r#"{"2":false,"10":true}"#);

        let back: OccupancyMap = serde_json::from_str(r#"{"02": false, "10": true}"#).unwrap();
        assert_eq!(back, occ);
        assert_eq!(back.occupied_count(), 1);
    }

    #[test]
    fn equality_requires_same_seat_set() {
        let a: OccupancyMap = [(SeatId::new(1), false)].into_iter().collect();
        let b: OccupancyMap = [(SeatId::new(1), false), (SeatId::new(2), false)]
            .into_iter()
            .collect();
        assert_ne!(a, b);
    }
}
