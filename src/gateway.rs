//! Persistence gateway for confirmed occupancy.
//!
//! Owns the two caches that live for the whole process: resolved seat record
//! references and the last occupancy that was durably written. Both are only
//! touched from the processing thread, one `write` at a time.
//!
//! A gateway without a store runs in detection-only mode: every write is a
//! no-op and events are still emitted upstream.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::occupancy::OccupancyMap;
use crate::seats::SeatId;
use crate::storage::{SeatRecordRef, SeatRecordStore, SeatWrite, SectionKey};

/// What happened to one confirmed map.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Detection-only mode, or an empty map.
    Skipped,
    Committed {
        seats: usize,
        cleared: BTreeSet<SeatId>,
    },
    /// The batch failed; nothing was retried and the last-written state is unchanged.
    Failed(String),
}

pub struct PersistenceGateway<S: SeatRecordStore> {
    store: Option<S>,
    section: SectionKey,
    refs: BTreeMap<SeatId, SeatRecordRef>,
    last_written: OccupancyMap,
}

impl<S: SeatRecordStore> PersistenceGateway<S> {
    pub fn new(store: S, section: SectionKey) -> Self {
        Self {
            store: Some(store),
            section,
            refs: BTreeMap::new(),
            last_written: OccupancyMap::default(),
        }
    }

    /// Detection-only gateway.
    pub fn disabled(section: SectionKey) -> Self {
        Self {
            store: None,
            section,
            refs: BTreeMap::new(),
            last_written: OccupancyMap::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn section(&self) -> &SectionKey {
        &self.section
    }

    pub fn store(&self) -> Option<&S> {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> Option<&mut S> {
        self.store.as_mut()
    }

    pub fn last_written(&self) -> &OccupancyMap {
        &self.last_written
    }

    /// Cache references for every existing seat record of the section.
    ///
    /// Returns how many references were cached.
    pub fn warm_cache(&mut self) -> Result<usize> {
        let Some(store) = self.store.as_mut() else {
            return Ok(0);
        };
        for (seat, record) in store.list_seats(&self.section)? {
            self.refs.entry(seat).or_insert(record);
        }
        log::info!(
            "cached {} seat record(s) under {}",
            self.refs.len(),
            self.section.collection_path()
        );
        Ok(self.refs.len())
    }

    /// Seats that were last written occupied and are now vacant.
    pub fn falling_edges(&self, occ: &OccupancyMap) -> BTreeSet<SeatId> {
        occ.iter()
            .filter(|(seat, occupied)| !occupied && self.last_written.get(*seat) == Some(true))
            .map(|(seat, _)| seat)
            .collect()
    }

    /// Upsert every seat of a confirmed map in one batch.
    ///
    /// Store failures are logged and reported in the outcome, never returned
    /// as errors.
    pub fn write(&mut self, occ: &OccupancyMap) -> WriteOutcome {
        if self.store.is_none() || occ.is_empty() {
            return WriteOutcome::Skipped;
        }
        let cleared = self.falling_edges(occ);

        let mut writes = Vec::with_capacity(occ.len());
        for (seat, occupied) in occ.iter() {
            let record = match self.resolve(seat) {
                Ok(record) => record,
                Err(err) => {
                    log::warn!("seat {} lookup failed: {:#}", seat, err);
                    return WriteOutcome::Failed(format!("{:#}", err));
                }
            };
            let clear_reservation = cleared.contains(&seat);
            log::info!(
                "upsert {} seat={} occupied={}{}",
                record.path(&self.section),
                seat,
                occupied,
                if clear_reservation { " (clear reserved)" } else { "" }
            );
            writes.push(SeatWrite {
                record,
                seat,
                is_occupied: occupied,
                clear_reservation,
            });
        }

        let Some(store) = self.store.as_mut() else {
            return WriteOutcome::Skipped;
        };
        match store.commit(&self.section, &writes) {
            Ok(()) => {
                self.last_written = occ.clone();
                WriteOutcome::Committed {
                    seats: writes.len(),
                    cleared,
                }
            }
            Err(err) => {
                log::warn!("seat batch write failed: {:#}", err);
                WriteOutcome::Failed(format!("{:#}", err))
            }
        }
    }

    /// Find-or-create the record reference for a seat, caching the result.
    fn resolve(&mut self, seat: SeatId) -> Result<SeatRecordRef> {
        if let Some(record) = self.refs.get(&seat) {
            return Ok(record.clone());
        }
        let found = match self.store.as_mut() {
            Some(store) => store.find_by_seat_number(&self.section, seat)?,
            None => None,
        };
        let record = found.unwrap_or_else(|| SeatRecordRef::for_seat(seat));
        self.refs.insert(seat, record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemorySeatStore;

    fn section() -> SectionKey {
        SectionKey::new("1002-9999", "1")
    }

    fn occ(pairs: &[(u32, bool)]) -> OccupancyMap {
        pairs
            .iter()
            .map(|(seat, occupied)| (SeatId::new(*seat), *occupied))
            .collect()
    }

    fn gateway() -> PersistenceGateway<InMemorySeatStore> {
        PersistenceGateway::new(InMemorySeatStore::default(), section())
    }

    #[test]
    fn disabled_gateway_skips_writes() {
        let mut gateway: PersistenceGateway<InMemorySeatStore> =
            PersistenceGateway::disabled(section());
        assert!(!gateway.is_enabled());
        assert_eq!(gateway.warm_cache().unwrap(), 0);
        assert_eq!(gateway.write(&occ(&[(1, true)])), WriteOutcome::Skipped);
        assert!(gateway.last_written().is_empty());
    }

    #[test]
    fn falling_edge_clears_reservation_in_same_batch() {
        let mut gateway = gateway();
        assert!(matches!(
            gateway.write(&occ(&[(1, true)])),
            WriteOutcome::Committed { .. }
        ));

        let record = SeatRecordRef::for_seat(SeatId::new(1));
        if let Some(store) = gateway.store_mut() {
            store.reserve(&section(), &record, SeatId::new(1), "passenger-7");
        }

        let outcome = gateway.write(&occ(&[(1, false)]));
        assert_eq!(
            outcome,
            WriteOutcome::Committed {
                seats: 1,
                cleared: [SeatId::new(1)].into_iter().collect(),
            }
        );
        assert_eq!(gateway.last_written(), &occ(&[(1, false)]));

        let store = gateway.store_mut().unwrap();
        let last_batch = store.commits().last().unwrap().clone();
        assert!(last_batch[0].clear_reservation);
        let stored = store.get(&section(), &record).unwrap().unwrap();
        assert!(!stored.reserved);
        assert_eq!(stored.reserved_by, None);
    }

    #[test]
    fn rising_and_unchanged_seats_do_not_clear() {
        let mut gateway = gateway();
        gateway.write(&occ(&[(1, false), (2, true)]));
        let outcome = gateway.write(&occ(&[(1, true), (2, true)]));
        assert_eq!(
            outcome,
            WriteOutcome::Committed {
                seats: 2,
                cleared: BTreeSet::new(),
            }
        );
    }

    #[test]
    fn failed_write_keeps_last_written_for_next_attempt() {
        let mut gateway = gateway();
        gateway.write(&occ(&[(1, true)]));

        gateway.store_mut().unwrap().set_fail_commits(true);
        assert!(matches!(
            gateway.write(&occ(&[(1, false)])),
            WriteOutcome::Failed(_)
        ));
        assert_eq!(gateway.last_written(), &occ(&[(1, true)]));

        gateway.store_mut().unwrap().set_fail_commits(false);
        assert_eq!(
            gateway.falling_edges(&occ(&[(1, false)])),
            [SeatId::new(1)].into_iter().collect()
        );
        assert!(matches!(
            gateway.write(&occ(&[(1, false)])),
            WriteOutcome::Committed { .. }
        ));
    }

    #[test]
    fn warm_cache_reuses_existing_record_ids() {
        let mut store = InMemorySeatStore::default();
        let legacy = SeatRecordRef::new("seat-a1");
        store.reserve(&section(), &legacy, SeatId::new(4), "crew");

        let mut gateway = PersistenceGateway::new(store, section());
        assert_eq!(gateway.warm_cache().unwrap(), 1);
        gateway.write(&occ(&[(4, true), (5, false)]));

        let batch = gateway.store().unwrap().commits()[0].clone();
        assert_eq!(batch[0].record, legacy);
        assert_eq!(batch[1].record.doc_id(), "5");
    }

    #[test]
    fn seats_absent_from_new_map_are_not_falling_edges() {
        let mut gateway = gateway();
        gateway.write(&occ(&[(1, true), (2, true)]));
        assert!(gateway.falling_edges(&occ(&[(2, true)])).is_empty());
    }
}
