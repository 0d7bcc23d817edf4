//! Debounce for per-frame occupancy.
//!
//! Frame-level occupancy flickers with pose noise and passing arms. A map only
//! becomes *confirmed* after it has been observed unchanged for `hold_secs`.
//!
//! State is the product of a baseline (`Unset` or `Stable(map)`) and an
//! optional pending candidate with its first-seen time. One transition
//! function covers both baselines:
//!
//! - a frame equal to the stable map clears any pending candidate;
//! - a frame differing from the pending candidate (or with none pending)
//!   restarts the dwell timer with itself as the candidate;
//! - a frame equal to the pending candidate promotes it once the dwell has
//!   reached `hold_secs`, and the pending slot is cleared.

use crate::occupancy::OccupancyMap;

pub const DEFAULT_HOLD_SECS: f64 = 1.0;

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Baseline {
    #[default]
    Unset,
    Stable(OccupancyMap),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pending {
    pub map: OccupancyMap,
    pub since: f64,
}

/// Snapshot of the tracker state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StabilityState {
    pub baseline: Baseline,
    pub pending: Option<Pending>,
}

#[derive(Clone, Debug)]
pub struct StabilityTracker {
    hold_secs: f64,
    state: StabilityState,
}

impl StabilityTracker {
    pub fn new(hold_secs: f64) -> Self {
        Self {
            hold_secs,
            state: StabilityState::default(),
        }
    }

    pub fn state(&self) -> &StabilityState {
        &self.state
    }

    pub fn stable(&self) -> Option<&OccupancyMap> {
        match &self.state.baseline {
            Baseline::Stable(map) => Some(map),
            Baseline::Unset => None,
        }
    }

    /// Feed one frame's occupancy observed at `t` seconds.
    ///
    /// Returns the newly confirmed map on the frame that crosses the dwell
    /// threshold, `None` otherwise.
    pub fn observe(&mut self, occ: &OccupancyMap, t: f64) -> Option<OccupancyMap> {
        if self.stable() == Some(occ) {
            self.state.pending = None;
            return None;
        }

        match &self.state.pending {
            Some(pending) if pending.map == *occ => {
                if t - pending.since < self.hold_secs {
                    return None;
                }
                let confirmed = pending.map.clone();
                log::debug!(
                    "occupancy confirmed after {:.3}s dwell ({} occupied)",
                    t - pending.since,
                    confirmed.occupied_count()
                );
                self.state.pending = None;
                self.state.baseline = Baseline::Stable(confirmed.clone());
                Some(confirmed)
            }
            _ => {
                self.state.pending = Some(Pending {
                    map: occ.clone(),
                    since: t,
                });
                None
            }
        }
    }
}

impl Default for StabilityTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_SECS)
    }
}
