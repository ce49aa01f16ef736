//! Test utilities & fixtures.
//!
//! Provides an in-memory record store with failure injection, a recording
//! display double, and a fully wired dispatcher harness. Tests that need a
//! real filesystem (fallback audit) get a temp dir per harness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;

use scantrack::config::{FallbackConfig, PortConfig};
use scantrack::display::{DisplayFrame, StationDisplay};
use scantrack::fallback::FallbackAudit;
use scantrack::station::dispatch::Dispatcher;
use scantrack::station::records::RecordLifecycle;
use scantrack::station::registry::StationRegistry;
use scantrack::station::session::Session;
use scantrack::station::timer::TimerSupervisor;
use scantrack::storage::{
    IndirectWork, NewRecord, RecordId, RecordStore, StoreError, WorkRecord,
};

/// In-memory record store with switchable failure injection.
#[derive(Default)]
pub struct MockStore {
    pub records: Mutex<Vec<WorkRecord>>,
    next_id: AtomicU64,
    pub fail_insert: AtomicBool,
    pub fail_close: AtomicBool,
    pub workers: Mutex<HashMap<String, String>>,
    pub processes: Mutex<HashMap<String, String>>,
    pub indirect: Mutex<HashMap<String, IndirectWork>>,
}

#[allow(dead_code)]
impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_records(&self) -> Vec<WorkRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.end_time.is_none())
            .cloned()
            .collect()
    }

    pub fn all_records(&self) -> Vec<WorkRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn seed_worker(&self, id: &str, label: &str) {
        self.workers
            .lock()
            .unwrap()
            .insert(id.to_string(), label.to_string());
    }

    pub fn seed_process(&self, id: &str, label: &str) {
        self.processes
            .lock()
            .unwrap()
            .insert(id.to_string(), label.to_string());
    }

    pub fn seed_indirect(&self, code: &str, status_label: &str, display_label: &str) {
        self.indirect.lock().unwrap().insert(
            code.to_string(),
            IndirectWork {
                status_label: status_label.to_string(),
                display_label: display_label.to_string(),
            },
        );
    }
}

impl RecordStore for MockStore {
    fn insert(&self, record: NewRecord) -> Result<RecordId, StoreError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected insert failure".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.records.lock().unwrap().push(WorkRecord {
            id,
            worker_id: record.worker_id,
            process_id: record.process_id,
            status: record.status,
            start_time: record.start_time,
            end_time: None,
            work_secs: None,
            payload: record.payload,
            fields: record.fields,
        });
        Ok(id)
    }

    fn close_latest_open(
        &self,
        payload: &str,
        worker: Option<&str>,
        process: Option<&str>,
    ) -> Result<u32, StoreError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected close failure".into()));
        }
        let mut records = self.records.lock().unwrap();
        let found = records.iter_mut().rev().find(|r| {
            r.end_time.is_none()
                && r.payload == payload
                && worker.map_or(true, |w| r.worker_id == w)
        });
        let Some(record) = found else { return Ok(0) };
        let now = Utc::now();
        record.end_time = Some(now);
        record.work_secs = Some((now - record.start_time).num_seconds().max(0));
        if let Some(w) = worker {
            record.worker_id = w.to_string();
        }
        if let Some(p) = process {
            record.process_id = p.to_string();
        }
        Ok(1)
    }

    fn find_latest_open(&self, payload: &str) -> Result<Option<WorkRecord>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.end_time.is_none() && r.payload == payload)
            .cloned())
    }

    fn update_open_status(
        &self,
        worker: &str,
        process: &str,
        status: &str,
    ) -> Result<u32, StoreError> {
        let mut records = self.records.lock().unwrap();
        let found = records
            .iter_mut()
            .rev()
            .find(|r| r.end_time.is_none() && r.worker_id == worker && r.process_id == process);
        match found {
            Some(record) => {
                record.status = status.to_string();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn resolve_worker_label(&self, worker_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.workers.lock().unwrap().get(worker_id).cloned())
    }

    fn resolve_process_label(&self, process_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.processes.lock().unwrap().get(process_id).cloned())
    }

    fn resolve_indirect_work(&self, code: &str) -> Result<Option<IndirectWork>, StoreError> {
        Ok(self.indirect.lock().unwrap().get(code).cloned())
    }
}

/// Records every display interaction for assertions.
#[derive(Default)]
pub struct RecordingDisplay {
    pub frames: Mutex<Vec<DisplayFrame>>,
    pub errors: Mutex<Vec<String>>,
    pub messages: Mutex<Vec<String>>,
    pub pair_animations: AtomicU64,
}

#[allow(dead_code)]
impl RecordingDisplay {
    pub fn last_frame(&self) -> Option<DisplayFrame> {
        self.frames.lock().unwrap().last().cloned()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn error_lines(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl StationDisplay for RecordingDisplay {
    fn update(&self, _port: &str, frame: &DisplayFrame) {
        self.frames.lock().unwrap().push(frame.clone());
    }

    fn show_error(&self, _port: &str, lines: &[&str], _duration: Option<Duration>) {
        self.errors.lock().unwrap().push(lines.join(" / "));
    }

    fn display_message(&self, _port: &str, text: &str, _duration: Duration) {
        self.messages.lock().unwrap().push(text.to_string());
    }

    fn play_pair_animation(&self, _port: &str) {
        self.pair_animations.fetch_add(1, Ordering::SeqCst);
    }
}

pub const TEST_PORT: &str = "/dev/ttyTEST0";

/// A fully wired dispatcher over the mock store and recording display.
#[allow(dead_code)]
pub struct Harness {
    pub dispatcher: Dispatcher,
    pub registry: Arc<StationRegistry>,
    pub store: Arc<MockStore>,
    pub display: Arc<RecordingDisplay>,
    pub cfg: PortConfig,
    pub fallback_dir: std::path::PathBuf,
    _tmp: tempfile::TempDir,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MockStore::new());
        let display = Arc::new(RecordingDisplay::default());
        let registry = Arc::new(StationRegistry::new());
        let fallback_dir = tmp.path().join("fallback");
        let audit = Arc::new(
            FallbackAudit::new(&FallbackConfig {
                dir: fallback_dir.to_string_lossy().into_owned(),
                max_bytes: 1024 * 1024,
                max_generations: 5,
            })
            .expect("audit"),
        );
        let timers = Arc::new(TimerSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&display) as Arc<dyn StationDisplay>,
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            RecordLifecycle::new(
                Arc::clone(&store) as Arc<dyn RecordStore>,
                Arc::clone(&audit),
            ),
            timers,
            Arc::clone(&display) as Arc<dyn StationDisplay>,
            audit,
        );

        registry.register(TEST_PORT, Session::new());

        let cfg = PortConfig {
            device: TEST_PORT.to_string(),
            baud_rate: 9600,
            data_bits: 8,
            parity: "N".to_string(),
            stop_bits: 1,
            timeout_ms: 500,
            enable: true,
            default_worker: Some("900000".to_string()),
            default_process: Some("PX000".to_string()),
            factory_code: Some("000100".to_string()),
        };

        Harness {
            dispatcher,
            registry,
            store,
            display,
            cfg,
            fallback_dir,
            _tmp: tmp,
        }
    }

    pub async fn scan(&self, line: &str) {
        self.dispatcher
            .handle_line(&self.cfg, line)
            .await
            .expect("scan handled");
    }

    pub fn session_status(&self) -> scantrack::station::session::Status {
        self.registry.snapshot(TEST_PORT).unwrap().session.status
    }
}
