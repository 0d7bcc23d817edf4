use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::seats::SeatId;

/// One cabin section: the seat records of a single car of a single train.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionKey {
    pub train_id: String,
    pub car_number: String,
}

impl SectionKey {
    pub fn new(train_id: impl Into<String>, car_number: impl Into<String>) -> Self {
        Self {
            train_id: train_id.into(),
            car_number: car_number.into(),
        }
    }

    pub fn collection_path(&self) -> String {
        format!("/trains/{}/cars/{}/seats", self.train_id, self.car_number)
    }
}

/// Resolved reference to one seat record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeatRecordRef {
    doc_id: String,
}

impl SeatRecordRef {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
        }
    }

    /// Reference for a record that does not exist yet: keyed by seat number.
    pub fn for_seat(seat: SeatId) -> Self {
        Self::new(seat.to_string())
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn path(&self, section: &SectionKey) -> String {
        format!("{}/{}", section.collection_path(), self.doc_id)
    }
}

/// Stored seat record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatRecord {
    pub seat_number: u32,
    pub is_occupied: bool,
    /// Store-assigned write time in milliseconds since the Unix epoch.
    pub vision_updated_at: Option<i64>,
    pub reserved: bool,
    pub reserved_by: Option<String>,
}

/// One seat upsert within a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeatWrite {
    pub record: SeatRecordRef,
    pub seat: SeatId,
    pub is_occupied: bool,
    /// Also clear `reserved` and remove `reservedBy`.
    pub clear_reservation: bool,
}

/// Durable seat-record store.
///
/// Writes have merge semantics: fields a write does not name are preserved.
pub trait SeatRecordStore {
    /// Every record in the section that carries a seat number.
    fn list_seats(&mut self, section: &SectionKey) -> Result<Vec<(SeatId, SeatRecordRef)>>;

    fn find_by_seat_number(
        &mut self,
        section: &SectionKey,
        seat: SeatId,
    ) -> Result<Option<SeatRecordRef>>;

    /// Apply all writes atomically, creating records that do not exist.
    fn commit(&mut self, section: &SectionKey, writes: &[SeatWrite]) -> Result<()>;

    fn get(&mut self, section: &SectionKey, record: &SeatRecordRef) -> Result<Option<SeatRecord>>;
}

fn server_time_ms() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock is before the Unix epoch"))?;
    i64::try_from(elapsed.as_millis()).map_err(|_| anyhow!("server time exceeds i64 range"))
}

fn seat_from_column(value: i64) -> Result<SeatId> {
    u32::try_from(value)
        .map(SeatId::new)
        .map_err(|_| anyhow!("corrupt seat record: seat number {} out of range", value))
}

pub struct SqliteSeatStore {
    conn: Connection,
}

impl SqliteSeatStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn =
            Connection::open(db_path).with_context(|| format!("open seat store {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS seat_records (
              train_id TEXT NOT NULL,
              car_number TEXT NOT NULL,
              doc_id TEXT NOT NULL,
              seat_number INTEGER,
              is_occupied INTEGER NOT NULL DEFAULT 0,
              vision_updated_at INTEGER,
              reserved INTEGER NOT NULL DEFAULT 0,
              reserved_by TEXT,
              PRIMARY KEY (train_id, car_number, doc_id)
            );

            CREATE INDEX IF NOT EXISTS idx_seat_records_number
              ON seat_records(train_id, car_number, seat_number);
            "#,
        )?;
        Ok(())
    }

    /// Mark a seat reserved, creating its record if needed.
    pub fn reserve(
        &mut self,
        section: &SectionKey,
        record: &SeatRecordRef,
        seat: SeatId,
        reserved_by: &str,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO seat_records(train_id, car_number, doc_id, seat_number, reserved, reserved_by)
            VALUES (?1, ?2, ?3, ?4, 1, ?5)
            ON CONFLICT(train_id, car_number, doc_id)
            DO UPDATE SET reserved = 1, reserved_by = excluded.reserved_by
            "#,
            params![
                section.train_id,
                section.car_number,
                record.doc_id(),
                i64::from(seat.number()),
                reserved_by
            ],
        )?;
        Ok(())
    }
}

impl SeatRecordStore for SqliteSeatStore {
    fn list_seats(&mut self, section: &SectionKey) -> Result<Vec<(SeatId, SeatRecordRef)>> {
        let rows = {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT seat_number, doc_id FROM seat_records
                WHERE train_id = ?1 AND car_number = ?2 AND seat_number IS NOT NULL
                ORDER BY seat_number ASC
                "#,
            )?;
            let mut rows = stmt.query(params![section.train_id, section.car_number])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let seat_number: i64 = row.get(0)?;
                let doc_id: String = row.get(1)?;
                out.push((seat_number, doc_id));
            }
            out
        };

        rows.into_iter()
            .map(|(seat_number, doc_id)| {
                Ok((seat_from_column(seat_number)?, SeatRecordRef::new(doc_id)))
            })
            .collect()
    }

    fn find_by_seat_number(
        &mut self,
        section: &SectionKey,
        seat: SeatId,
    ) -> Result<Option<SeatRecordRef>> {
        let doc_id: Option<String> = self
            .conn
            .query_row(
                r#"
                SELECT doc_id FROM seat_records
                WHERE train_id = ?1 AND car_number = ?2 AND seat_number = ?3
                ORDER BY doc_id ASC LIMIT 1
                "#,
                params![section.train_id, section.car_number, i64::from(seat.number())],
                |row| row.get(0),
            )
            .optional()?;
        Ok(doc_id.map(SeatRecordRef::new))
    }

    fn commit(&mut self, section: &SectionKey, writes: &[SeatWrite]) -> Result<()> {
        let now_ms = server_time_ms()?;
        let tx = self.conn.transaction()?;
        for write in writes {
            tx.execute(
                r#"
                INSERT INTO seat_records(train_id, car_number, doc_id, seat_number, is_occupied, vision_updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(train_id, car_number, doc_id)
                DO UPDATE SET seat_number = excluded.seat_number,
                              is_occupied = excluded.is_occupied,
                              vision_updated_at = excluded.vision_updated_at
                "#,
                params![
                    section.train_id,
                    section.car_number,
                    write.record.doc_id(),
                    i64::from(write.seat.number()),
                    write.is_occupied,
                    now_ms
                ],
            )?;
            if write.clear_reservation {
                tx.execute(
                    r#"
                    UPDATE seat_records SET reserved = 0, reserved_by = NULL
                    WHERE train_id = ?1 AND car_number = ?2 AND doc_id = ?3
                    "#,
                    params![section.train_id, section.car_number, write.record.doc_id()],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&mut self, section: &SectionKey, record: &SeatRecordRef) -> Result<Option<SeatRecord>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT seat_number, is_occupied, vision_updated_at, reserved, reserved_by
                FROM seat_records
                WHERE train_id = ?1 AND car_number = ?2 AND doc_id = ?3
                "#,
                params![section.train_id, section.car_number, record.doc_id()],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((seat_number, is_occupied, vision_updated_at, reserved, reserved_by)) = row else {
            return Ok(None);
        };
        let seat_number = seat_number
            .ok_or_else(|| anyhow!("seat record {} has no seat number", record.path(section)))?;
        Ok(Some(SeatRecord {
            seat_number: seat_from_column(seat_number)?.number(),
            is_occupied,
            vision_updated_at,
            reserved,
            reserved_by,
        }))
    }
}

/// Process-local store for tests and dry runs.
#[derive(Clone, Debug, Default)]
pub struct InMemorySeatStore {
    records: BTreeMap<(SectionKey, SeatRecordRef), SeatRecord>,
    commits: Vec<Vec<SeatWrite>>,
    fail_commits: bool,
}

impl InMemorySeatStore {
    /// Make every subsequent commit fail without applying anything.
    pub fn set_fail_commits(&mut self, fail: bool) {
        self.fail_commits = fail;
    }

    /// Batches that were committed successfully, oldest first.
    pub fn commits(&self) -> &[Vec<SeatWrite>] {
        &self.commits
    }

    pub fn reserve(
        &mut self,
        section: &SectionKey,
        record: &SeatRecordRef,
        seat: SeatId,
        reserved_by: &str,
    ) {
        let entry = self
            .records
            .entry((section.clone(), record.clone()))
            .or_insert_with(|| SeatRecord {
                seat_number: seat.number(),
                is_occupied: false,
                vision_updated_at: None,
                reserved: false,
                reserved_by: None,
            });
        entry.reserved = true;
        entry.reserved_by = Some(reserved_by.to_string());
    }
}

impl SeatRecordStore for InMemorySeatStore {
    fn list_seats(&mut self, section: &SectionKey) -> Result<Vec<(SeatId, SeatRecordRef)>> {
        Ok(self
            .records
            .iter()
            .filter(|((key, _), _)| key == section)
            .map(|((_, record), value)| (SeatId::new(value.seat_number), record.clone()))
            .collect())
    }

    fn find_by_seat_number(
        &mut self,
        section: &SectionKey,
        seat: SeatId,
    ) -> Result<Option<SeatRecordRef>> {
        Ok(self
            .records
            .iter()
            .find(|((key, _), value)| key == section && value.seat_number == seat.number())
            .map(|((_, record), _)| record.clone()))
    }

    fn commit(&mut self, section: &SectionKey, writes: &[SeatWrite]) -> Result<()> {
        if self.fail_commits {
            return Err(anyhow!("seat store unavailable"));
        }
        let now_ms = server_time_ms()?;
        for write in writes {
            let entry = self
                .records
                .entry((section.clone(), write.record.clone()))
                .or_insert_with(|| SeatRecord {
                    seat_number: write.seat.number(),
                    is_occupied: false,
                    vision_updated_at: None,
                    reserved: false,
                    reserved_by: None,
                });
            entry.seat_number = write.seat.number();
            entry.is_occupied = write.is_occupied;
            entry.vision_updated_at = Some(now_ms);
            if write.clear_reservation {
                entry.reserved = false;
                entry.reserved_by = None;
            }
        }
        self.commits.push(writes.to_vec());
        Ok(())
    }

    fn get(&mut self, section: &SectionKey, record: &SeatRecordRef) -> Result<Option<SeatRecord>> {
        Ok(self
            .records
            .get(&(section.clone(), record.clone()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section() -> SectionKey {
        SectionKey::new("1002-9999", "1")
    }

    fn write(seat: u32, occupied: bool, clear: bool) -> SeatWrite {
        let seat = SeatId::new(seat);
        SeatWrite {
            record: SeatRecordRef::for_seat(seat),
            seat,
            is_occupied: occupied,
            clear_reservation: clear,
        }
    }

    #[test]
    fn record_paths_follow_section_layout() {
        let record = SeatRecordRef::for_seat(SeatId::new(7));
        assert_eq!(record.path(&section()), "/trains/1002-9999/cars/1/seats/7");
    }

    #[test]
    fn sqlite_commit_creates_then_merges() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("seats.db");
        let mut store = SqliteSeatStore::open(db.to_str().unwrap()).unwrap();
        let section = section();

        assert!(store.find_by_seat_number(&section, SeatId::new(3)).unwrap().is_none());
        store.commit(&section, &[write(3, true, false)]).unwrap();

        let found = store
            .find_by_seat_number(&section, SeatId::new(3))
            .unwrap()
            .unwrap();
        assert_eq!(found.doc_id(), "3");

        store.reserve(&section, &found, SeatId::new(3), "passenger-42").unwrap();
        store.commit(&section, &[write(3, true, false)]).unwrap();
        let record = store.get(&section, &found).unwrap().unwrap();
        assert!(record.is_occupied);
        assert!(record.reserved);
        assert_eq!(record.reserved_by.as_deref(), Some("passenger-42"));
        assert!(record.vision_updated_at.is_some());

        store.commit(&section, &[write(3, false, true)]).unwrap();
        let record = store.get(&section, &found).unwrap().unwrap();
        assert!(!record.is_occupied);
        assert!(!record.reserved);
        assert_eq!(record.reserved_by, None);
    }

    #[test]
    fn sqlite_lists_only_its_section() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("seats.db");
        let mut store = SqliteSeatStore::open(db.to_str().unwrap()).unwrap();
        store
            .commit(&section(), &[write(2, false, false), write(1, true, false)])
            .unwrap();
        store
            .commit(&SectionKey::new("1002-9999", "2"), &[write(9, true, false)])
            .unwrap();

        let listed = store.list_seats(&section()).unwrap();
        let seats: Vec<u32> = listed.iter().map(|(seat, _)| seat.number()).collect();
        assert_eq!(seats, vec![1, 2]);
    }

    #[test]
    fn sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("seats.db");
        {
            let mut store = SqliteSeatStore::open(db.to_str().unwrap()).unwrap();
            store.commit(&section(), &[write(5, true, false)]).unwrap();
        }
        let mut store = SqliteSeatStore::open(db.to_str().unwrap()).unwrap();
        let record = store
            .get(&section(), &SeatRecordRef::for_seat(SeatId::new(5)))
            .unwrap()
            .unwrap();
        assert_eq!(record.seat_number, 5);
        assert!(record.is_occupied);
    }

    #[test]
    fn in_memory_failed_commit_applies_nothing() {
        let mut store = InMemorySeatStore::default();
        store.set_fail_commits(true);
        assert!(store.commit(&section(), &[write(1, true, false)]).is_err());
        assert!(store.list_seats(&section()).unwrap().is_empty());
        assert!(store.commits().is_empty());

        store.set_fail_commits(false);
        store.commit(&section(), &[write(1, true, false)]).unwrap();
        assert_eq!(store.commits().len(), 1);
    }

    #[test]
    fn record_serializes_with_document_field_names() {
        let record = SeatRecord {
            seat_number: 4,
            is_occupied: true,
            vision_updated_at: Some(1_700_000_000_000),
            reserved: false,
            reserved_by: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["seatNumber"], 4);
        assert_eq!(json["isOccupied"], true);
        assert_eq!(json["visionUpdatedAt"], 1_700_000_000_000i64);
        assert!(json["reservedBy"].is_null());
    }
}
