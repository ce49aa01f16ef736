//! Sled-backed persistence for work records and master labels.
//!
//! Values are bincode-serialized; records live under one tree keyed by a
//! monotonically increasing id, master labels under three small trees. The
//! "latest open" queries are bounded to a two-day lookback so an interval that
//! was never closed (power loss, long weekend) does not get resurrected weeks
//! later by an unrelated scan.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use sled::IVec;

use super::{IndirectWork, NewRecord, RecordId, RecordStore, StoreError, WorkRecord};

const TREE_RECORDS: &str = "work_records";
const TREE_WORKERS: &str = "worker_master";
const TREE_PROCESSES: &str = "process_master";
const TREE_INDIRECT: &str = "indirect_work_master";

/// How many days back "latest open" queries reach, counting today.
const LOOKBACK_DAYS: i64 = 2;

/// Aggregate counters for the `status` command.
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    pub total_records: usize,
    pub open_records: usize,
    pub worker_labels: usize,
    pub process_labels: usize,
    pub indirect_codes: usize,
}

pub struct SledRecordStore {
    db: sled::Db,
    records: sled::Tree,
    workers: sled::Tree,
    processes: sled::Tree,
    indirect: sled::Tree,
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Backend(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &IVec) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Backend(e.to_string()))
}

fn backend(e: sled::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Start of the lookback window: local midnight `LOOKBACK_DAYS - 1` days ago,
/// expressed in UTC.
fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc();
    midnight - Duration::days(LOOKBACK_DAYS - 1)
}

impl SledRecordStore {
    /// Open (or create) the store under `path`.
    ///
    /// An open failure is reported as [`StoreError::Transient`]: the directory
    /// may be locked by a previous instance that has not released it yet, so
    /// the caller's acquisition retry applies.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref()).map_err(|e| StoreError::Transient(e.to_string()))?;
        let records = db.open_tree(TREE_RECORDS).map_err(backend)?;
        let workers = db.open_tree(TREE_WORKERS).map_err(backend)?;
        let processes = db.open_tree(TREE_PROCESSES).map_err(backend)?;
        let indirect = db.open_tree(TREE_INDIRECT).map_err(backend)?;
        Ok(Self {
            db,
            records,
            workers,
            processes,
            indirect,
        })
    }

    /// Register a worker display label (used by `init` seeding and tests).
    pub fn seed_worker_label(&self, worker_id: &str, label: &str) -> Result<(), StoreError> {
        self.workers
            .insert(worker_id.as_bytes(), encode(&label.to_string())?)
            .map_err(backend)?;
        Ok(())
    }

    /// Register a process display label.
    pub fn seed_process_label(&self, process_id: &str, label: &str) -> Result<(), StoreError> {
        self.processes
            .insert(process_id.as_bytes(), encode(&label.to_string())?)
            .map_err(backend)?;
        Ok(())
    }

    /// Register an indirect-work master row.
    pub fn seed_indirect_work(&self, code: &str, row: &IndirectWork) -> Result<(), StoreError> {
        self.indirect
            .insert(code.as_bytes(), encode(row)?)
            .map_err(backend)?;
        Ok(())
    }

    pub fn statistics(&self) -> Result<StoreStatistics, StoreError> {
        let mut total = 0usize;
        let mut open = 0usize;
        for item in self.records.iter() {
            let (_, value) = item.map_err(backend)?;
            let record: WorkRecord = decode(&value)?;
            total += 1;
            if record.end_time.is_none() {
                open += 1;
            }
        }
        Ok(StoreStatistics {
            total_records: total,
            open_records: open,
            worker_labels: self.workers.len(),
            process_labels: self.processes.len(),
            indirect_codes: self.indirect.len(),
        })
    }

    /// Newest open record matching `pred`, scanning id-descending and stopping
    /// once records fall out of the lookback window (`bounded = true`).
    fn latest_open_where<F>(
        &self,
        bounded: bool,
        mut pred: F,
    ) -> Result<Option<WorkRecord>, StoreError>
    where
        F: FnMut(&WorkRecord) -> bool,
    {
        let cutoff = window_start(Utc::now());
        for item in self.records.iter().rev() {
            let (_, value) = item.map_err(backend)?;
            let record: WorkRecord = decode(&value)?;
            // Ids are insertion-ordered, so once a record predates the window
            // everything older does too.
            if bounded && record.start_time < cutoff {
                break;
            }
            if record.end_time.is_none() && pred(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn put_record(&self, record: &WorkRecord) -> Result<(), StoreError> {
        self.records
            .insert(record.id.to_be_bytes(), encode(record)?)
            .map_err(backend)?;
        self.records.flush().map_err(backend)?;
        Ok(())
    }
}

impl RecordStore for SledRecordStore {
    fn insert(&self, record: NewRecord) -> Result<RecordId, StoreError> {
        let id = self.db.generate_id().map_err(backend)?;
        let stored = WorkRecord {
            id,
            worker_id: record.worker_id,
            process_id: record.process_id,
            status: record.status,
            start_time: record.start_time,
            end_time: None,
            work_secs: None,
            payload: record.payload,
            fields: record.fields,
        };
        self.put_record(&stored)?;
        Ok(id)
    }

    fn close_latest_open(
        &self,
        payload: &str,
        worker: Option<&str>,
        process: Option<&str>,
    ) -> Result<u32, StoreError> {
        let found = self.latest_open_where(true, |r| {
            r.payload == payload && worker.map_or(true, |w| r.worker_id == w)
        })?;
        let Some(mut record) = found else {
            return Ok(0);
        };

        let now = Utc::now();
        record.end_time = Some(now);
        record.work_secs = Some((now - record.start_time).num_seconds().max(0));
        if let Some(w) = worker {
            record.worker_id = w.to_string();
        }
        if let Some(p) = process {
            record.process_id = p.to_string();
        }
        self.put_record(&record)?;
        Ok(1)
    }

    fn find_latest_open(&self, payload: &str) -> Result<Option<WorkRecord>, StoreError> {
        self.latest_open_where(true, |r| r.payload == payload)
    }

    fn update_open_status(
        &self,
        worker: &str,
        process: &str,
        status: &str,
    ) -> Result<u32, StoreError> {
        let found =
            self.latest_open_where(false, |r| r.worker_id == worker && r.process_id == process)?;
        let Some(mut record) = found else {
            return Ok(0);
        };
        record.status = status.to_string();
        self.put_record(&record)?;
        Ok(1)
    }

    fn resolve_worker_label(&self, worker_id: &str) -> Result<Option<String>, StoreError> {
        match self.workers.get(worker_id.as_bytes()).map_err(backend)? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn resolve_process_label(&self, process_id: &str) -> Result<Option<String>, StoreError> {
        match self.processes.get(process_id.as_bytes()).map_err(backend)? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn resolve_indirect_work(&self, code: &str) -> Result<Option<IndirectWork>, StoreError> {
        match self.indirect.get(code.as_bytes()).map_err(backend)? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RecordFields;

    fn store() -> (tempfile::TempDir, SledRecordStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SledRecordStore::open(dir.path().join("records")).expect("open");
        (dir, store)
    }

    fn new_record(worker: &str, payload: &str) -> NewRecord {
        NewRecord {
            worker_id: worker.to_string(),
            process_id: "P0001".to_string(),
            status: "operation".to_string(),
            start_time: Utc::now(),
            payload: payload.to_string(),
            fields: RecordFields::default(),
        }
    }

    #[test]
    fn insert_then_close_round_trip() {
        let (_dir, store) = store();
        store.insert(new_record("100", "PAYLOAD-A")).unwrap();

        let open = store.find_latest_open("PAYLOAD-A").unwrap().unwrap();
        assert_eq!(open.worker_id, "100");
        assert!(open.end_time.is_none());

        let rows = store
            .close_latest_open("PAYLOAD-A", Some("100"), None)
            .unwrap();
        assert_eq!(rows, 1);
        assert!(store.find_latest_open("PAYLOAD-A").unwrap().is_none());
    }

    #[test]
    fn close_misses_when_nothing_open() {
        let (_dir, store) = store();
        let rows = store.close_latest_open("NOPE", None, None).unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn close_picks_newest_matching_worker() {
        let (_dir, store) = store();
        store.insert(new_record("100", "PAYLOAD-A")).unwrap();
        store.insert(new_record("200", "PAYLOAD-A")).unwrap();

        let rows = store
            .close_latest_open("PAYLOAD-A", Some("200"), None)
            .unwrap();
        assert_eq!(rows, 1);
        // The first worker's record is still open.
        let remaining = store.find_latest_open("PAYLOAD-A").unwrap().unwrap();
        assert_eq!(remaining.worker_id, "100");
    }

    #[test]
    fn status_update_targets_open_record() {
        let (_dir, store) = store();
        store.insert(new_record("100", "PAYLOAD-A")).unwrap();

        let rows = store.update_open_status("100", "P0001", "rework").unwrap();
        assert_eq!(rows, 1);
        let open = store.find_latest_open("PAYLOAD-A").unwrap().unwrap();
        assert_eq!(open.status, "rework");

        store
            .close_latest_open("PAYLOAD-A", Some("100"), None)
            .unwrap();
        let rows = store.update_open_status("100", "P0001", "rework").unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn master_labels_resolve_when_seeded() {
        let (_dir, store) = store();
        assert!(store.resolve_worker_label("42").unwrap().is_none());
        store.seed_worker_label("42", "ANDO").unwrap();
        assert_eq!(store.resolve_worker_label("42").unwrap().unwrap(), "ANDO");

        store
            .seed_indirect_work(
                "A01",
                &IndirectWork {
                    status_label: "5S cleanup".to_string(),
                    display_label: "CLEAN ".to_string(),
                },
            )
            .unwrap();
        let row = store.resolve_indirect_work("A01").unwrap().unwrap();
        assert_eq!(row.display_label, "CLEAN ");
    }
}
