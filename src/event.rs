use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::occupancy::OccupancyMap;

/// One confirmed occupancy transition, as emitted at the process boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedEvent {
    pub frame: u64,
    /// Stream time in seconds, rounded to milliseconds.
    pub t: f64,
    pub seats: OccupancyMap,
}

impl ConfirmedEvent {
    pub fn new(frame: u64, t: f64, seats: OccupancyMap) -> Self {
        Self {
            frame,
            t: (t * 1000.0).round() / 1000.0,
            seats,
        }
    }

    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seats::SeatId;

    #[test]
    fn json_line_shape() {
        let seats: OccupancyMap = [(SeatId::new(1), true), (SeatId::new(2), false)]
            .into_iter()
            .collect();
        let event = ConfirmedEvent::new(42, 1.23456, seats);
        assert_eq!(event.t, 1.235);
        assert_eq!(
            event.to_json_line().unwrap(),
            r#"{"frame":42,"t":1.235,"seats":{"1":true,"2":false}}"#
        );
    }
}
