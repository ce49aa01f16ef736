//! Scan dispatch: one classified line in, exactly one handler out.
//!
//! The dispatcher owns the eight handlers behind the classifier branches.
//! Handlers mutate session state through the registry (short lock holds,
//! never across I/O), drive record opens/closes through the lifecycle
//! manager, and push display updates. A handler failure is reported upward
//! but must never poison state for other ports; the ingestion task logs it
//! and keeps reading.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use crate::config::PortConfig;
use crate::display::{show_temp_error, DisplayFrame, ErrorCode, StationDisplay};
use crate::fallback::FallbackAudit;
use crate::logutil::{escape_log, truncate_utf8};
use crate::qr::{self, fields::InstructionFields, QrKind, DEFAULT_STATUS_LABEL};
use crate::station::pairing::Assignment;
use crate::station::records::{acquire_with_retry, CloseTarget, RecordLifecycle};
use crate::station::registry::{StationRegistry, StationSnapshot};
use crate::station::session::{Status, EMPTY_CHECK_NO};
use crate::station::timer::TimerSupervisor;
use crate::storage::RecordFields;

/// Byte budget for persisting an unrecognized payload.
const ERROR_PAYLOAD_MAX_BYTES: usize = 400;

/// Status column value for unrecognized payloads.
const ERROR_STATUS: &str = "E05:scan error";

/// Label shown for ids missing from the master tables.
const UNREGISTERED_LABEL: &str = "unregistered";

/// Fallbacks when an indirect-work code is missing from its master table.
const INDIRECT_FALLBACK_STATUS: &str = "indirect work";
const INDIRECT_FALLBACK_LABEL: &str = "INDIR ";

/// Worker/process assumed when a record must be written before any code was
/// scanned and the port config carries no defaults.
const FALLBACK_WORKER: &str = "000000";
const FALLBACK_PROCESS: &str = "PX000";

/// How long the scanned-line echo stays on the panel.
const SCAN_ECHO_SECS: u64 = 2;

/// Shrink a full check number to its 6 display columns.
fn check_no_label(check_no: &str) -> String {
    if check_no.is_empty() {
        return EMPTY_CHECK_NO.to_string();
    }
    if check_no.len() <= 6 {
        return check_no.to_string();
    }
    let label: String = check_no.chars().skip(5).take(6).collect();
    format!("{:<6}", label)
}

pub struct Dispatcher {
    registry: Arc<StationRegistry>,
    records: RecordLifecycle,
    timers: Arc<TimerSupervisor>,
    display: Arc<dyn StationDisplay>,
    audit: Arc<FallbackAudit>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<StationRegistry>,
        records: RecordLifecycle,
        timers: Arc<TimerSupervisor>,
        display: Arc<dyn StationDisplay>,
        audit: Arc<FallbackAudit>,
    ) -> Self {
        Self {
            registry,
            records,
            timers,
            display,
            audit,
        }
    }

    /// Route one decoded line through the classifier to its handler.
    pub async fn handle_line(&self, cfg: &PortConfig, line: &str) -> anyhow::Result<()> {
        let port = cfg.device.as_str();
        self.display
            .display_message(port, line, Duration::from_secs(SCAN_ECHO_SECS));

        let last = self.registry.last_instruction(port);
        let kind = qr::classify(line, last.as_deref());
        info!("[{}] scan {:?}: {}", port, discriminant_name(&kind), escape_log(line));

        match kind {
            QrKind::EndOrSame => self.handle_end_or_same(port, line).await,
            QrKind::StatusCode(label) => self.handle_status(port, label).await,
            QrKind::ProcessCode => self.handle_process(port, line).await,
            QrKind::WorkerCode(id) => self.handle_worker(port, id).await,
            QrKind::IndirectWork { code, factory } => {
                let code = code.to_string();
                let factory = factory.map(str::to_string);
                self.handle_indirect(cfg, line, &code, factory.as_deref())
                    .await
            }
            QrKind::Instruction(fields) => {
                let switching = last.is_some();
                self.handle_instruction(cfg, fields, switching).await
            }
            QrKind::Unrecognized => self.handle_error(port, line).await,
        }
    }

    fn snapshot(&self, port: &str) -> anyhow::Result<StationSnapshot> {
        self.registry
            .snapshot(port)
            .ok_or_else(|| anyhow::anyhow!("port {} not registered", port))
    }

    fn frame_from(&self, snap: &StationSnapshot) -> DisplayFrame {
        let session = &snap.session;
        let worker = if snap.pair_mode && !session.worker2_label.is_empty() {
            format!("{}+", session.worker_label)
        } else {
            session.worker_label.clone()
        };
        DisplayFrame {
            status: session.status.label().to_string(),
            timer: session.timer_label.clone(),
            worker,
            process: session.process_label.clone(),
            check_no: session.check_no_label.clone(),
            show_rework: false,
            show_blink: session.status == Status::Working,
        }
    }

    /// Branch 1: the end sentinel, or a repeat of the last accepted
    /// instruction. Close whatever is open, stop the timer, end the session.
    async fn handle_end_or_same(&self, port: &str, _line: &str) -> anyhow::Result<()> {
        let snap = self.snapshot(port)?;
        let prev = snap.last_instruction.clone();

        self.timers.stop(port).await;

        if let Some(prev_payload) = prev {
            let target = CloseTarget {
                payload: &prev_payload,
                worker: snap.session.worker_id.as_deref(),
                worker2: snap.session.worker2_id.as_deref(),
                process: snap.session.process_id.as_deref(),
                pair_mode: snap.pair_mode,
            };
            if let Err(e) = self.records.close_records(port, target).await {
                // Audited inside; the session stays Ended regardless.
                warn!("[{}] close failed on end scan: {}", port, e);
                show_temp_error(self.display.as_ref(), port, ErrorCode::E08);
            }
            self.registry.with_entry(port, |entry| {
                entry.last_instruction = None;
            });
        } else {
            info!("[{}] end scan with no accepted instruction; session ended locally", port);
        }

        let snap = self.snapshot(port)?;
        self.display.update(port, &self.frame_from(&snap));
        Ok(())
    }

    /// Branch 2: a status/rework annotation. Applied to the open record when
    /// one exists, otherwise parked for the next insert.
    async fn handle_status(&self, port: &str, label: &'static str) -> anyhow::Result<()> {
        let snap = self.snapshot(port)?;
        let session = &snap.session;

        let mut applied = false;
        if session.status == Status::Working {
            if let (Some(worker), Some(process)) = (&session.worker_id, &session.process_id) {
                match self.records.update_status(port, worker, process, label).await {
                    Ok(rows) if rows > 0 => {
                        applied = true;
                        info!("[{}] status updated to {} (direct)", port, label);
                    }
                    Ok(_) => {}
                    Err(e) => warn!("[{}] status update failed: {}", port, e),
                }
            }
        }

        self.registry.with_entry(port, |entry| {
            if applied {
                entry.session.pending_status_override = None;
            } else {
                entry.session.pending_status_override = Some(label.to_string());
                info!("[{}] pending status set to {}", port, label);
            }
        });

        // Transient annotation frame, independent of which path was taken.
        let mut frame = self.frame_from(&snap);
        frame.status = format!("* {}", label);
        frame.show_rework = true;
        self.display.update(port, &frame);
        Ok(())
    }

    /// Branch 3: a process code. Display-affecting only.
    async fn handle_process(&self, port: &str, code: &str) -> anyhow::Result<()> {
        let label = match acquire_with_retry(|| {
            self.records.store().resolve_process_label(code)
        })
        .await
        {
            Ok(Some(label)) => label,
            Ok(None) => UNREGISTERED_LABEL.to_string(),
            Err(e) => {
                warn!("[{}] process label lookup failed for {}: {}", port, code, e);
                UNREGISTERED_LABEL.to_string()
            }
        };

        self.registry.with_entry(port, |entry| {
            entry.session.process_id = Some(code.to_string());
            entry.session.process_label = label.clone();
        });
        info!("[{}] process set to {} ({})", port, code, label);

        let snap = self.snapshot(port)?;
        self.display.update(port, &self.frame_from(&snap));
        Ok(())
    }

    /// Branch 4: a worker code. Feeds the pairing window and refreshes the
    /// operator assignment; never touches records.
    async fn handle_worker(&self, port: &str, worker_id: &str) -> anyhow::Result<()> {
        let now = Utc::now();
        let outcome = self
            .registry
            .with_entry(port, |entry| {
                let outcome = entry.pair.observe(worker_id, now);
                match &outcome.assignment {
                    Assignment::Solo(w) => {
                        entry.session.worker_id = Some(w.clone());
                        entry.session.worker2_id = None;
                        entry.session.worker2_label.clear();
                    }
                    Assignment::Pair(first, second) => {
                        entry.session.worker_id = Some(first.clone());
                        entry.session.worker2_id = Some(second.clone());
                    }
                }
                outcome
            })
            .ok_or_else(|| anyhow::anyhow!("port {} not registered", port))?;

        match &outcome.assignment {
            Assignment::Solo(w) => info!("[{}] solo operator {}", port, w),
            Assignment::Pair(a, b) => info!("[{}] pair operators {} + {}", port, a, b),
        }

        // Resolve labels outside the lock.
        let (first, second) = match &outcome.assignment {
            Assignment::Solo(w) => (w.clone(), None),
            Assignment::Pair(a, b) => (a.clone(), Some(b.clone())),
        };
        let first_label = self.worker_label(port, &first).await;
        let second_label = match &second {
            Some(id) => Some(self.worker_label(port, id).await),
            None => None,
        };

        self.registry.with_entry(port, |entry| {
            entry.session.worker_label = first_label;
            entry.session.worker2_label = second_label.unwrap_or_default();
        });

        if outcome.entered_pair {
            self.display.play_pair_animation(port);
        }

        let snap = self.snapshot(port)?;
        self.display.update(port, &self.frame_from(&snap));
        Ok(())
    }

    async fn worker_label(&self, port: &str, worker_id: &str) -> String {
        match acquire_with_retry(|| self.records.store().resolve_worker_label(worker_id)).await {
            Ok(Some(label)) => label,
            Ok(None) => UNREGISTERED_LABEL.to_string(),
            Err(e) => {
                warn!("[{}] worker label lookup failed for {}: {}", port, worker_id, e);
                UNREGISTERED_LABEL.to_string()
            }
        }
    }

    /// Branch 5: an indirect-work code. Opens a record immediately with the
    /// master table's status label; the pending status override is ignored
    /// and preserved.
    async fn handle_indirect(
        &self,
        cfg: &PortConfig,
        payload: &str,
        code: &str,
        factory: Option<&str>,
    ) -> anyhow::Result<()> {
        let port = cfg.device.as_str();

        let resolved = match acquire_with_retry(|| {
            self.records.store().resolve_indirect_work(code)
        })
        .await
        {
            Ok(row) => row,
            Err(e) => {
                warn!("[{}] indirect master lookup failed for {}: {}", port, code, e);
                None
            }
        };
        let (status_label, display_label) = match resolved {
            Some(row) => {
                let label: String = row.display_label.chars().take(6).collect();
                (row.status_label, format!("{:<6}", label))
            }
            None => (
                INDIRECT_FALLBACK_STATUS.to_string(),
                INDIRECT_FALLBACK_LABEL.to_string(),
            ),
        };

        // The payload's factory wins; the port config fills the gap.
        let factory = factory
            .map(str::to_string)
            .or_else(|| cfg.factory_code.clone());

        self.ensure_identity_defaults(cfg);
        let snap = self.snapshot(port)?;
        let worker = snap.session.worker_id.clone().unwrap_or_default();
        let worker2 = snap
            .pair_mode
            .then(|| snap.session.worker2_id.clone())
            .flatten();
        let process = snap.session.process_id.clone().unwrap_or_default();

        let fields = RecordFields {
            load_proc_code: factory.clone(),
            pre_proc_code: factory.clone(),
            post_proc_code: factory,
            ..RecordFields::default()
        };

        let start = Utc::now();
        if let Err(e) = self
            .records
            .open_records(
                port,
                &worker,
                worker2.as_deref(),
                &process,
                &status_label,
                start,
                payload,
                fields,
            )
            .await
        {
            warn!("[{}] indirect insert failed: {}", port, e);
            show_temp_error(self.display.as_ref(), port, ErrorCode::E06);
            return Ok(());
        }
        info!("[{}] indirect work recorded: {}", port, status_label);

        self.registry.with_entry(port, |entry| {
            entry.session.current_payload = Some(payload.to_string());
            entry.session.check_no = None;
            entry.session.check_no_label = display_label.clone();
        });

        self.resolve_cached_labels(port).await;
        self.timers.start(port).await;

        let snap = self.snapshot(port)?;
        let mut frame = self.frame_from(&snap);
        frame.check_no = display_label;
        self.display.update(port, &frame);
        Ok(())
    }

    /// Branches 6/7: a standard instruction. Switch closes the previous
    /// instruction first; a failed close never prevents the open.
    async fn handle_instruction(
        &self,
        cfg: &PortConfig,
        fields: InstructionFields,
        switching: bool,
    ) -> anyhow::Result<()> {
        let port = cfg.device.as_str();
        let payload = fields.payload.clone();

        if switching {
            let snap = self.snapshot(port)?;
            if let Some(prev_payload) = snap.last_instruction.clone() {
                self.timers.stop(port).await;
                let target = CloseTarget {
                    payload: &prev_payload,
                    worker: snap.session.worker_id.as_deref(),
                    worker2: snap.session.worker2_id.as_deref(),
                    process: snap.session.process_id.as_deref(),
                    pair_mode: snap.pair_mode,
                };
                if let Err(e) = self.records.close_records(port, target).await {
                    // Deliberate: the new scan must not be lost because the
                    // old close failed. Flagged in DESIGN.md.
                    warn!(
                        "[{}] close of previous instruction failed; continuing with open: {}",
                        port, e
                    );
                    show_temp_error(self.display.as_ref(), port, ErrorCode::E08);
                }
            }
        }

        self.ensure_identity_defaults(cfg);
        let status_val = self
            .registry
            .with_entry(port, |entry| {
                entry.session.take_status_override(DEFAULT_STATUS_LABEL)
            })
            .unwrap_or_else(|| DEFAULT_STATUS_LABEL.to_string());

        let snap = self.snapshot(port)?;
        let worker = snap.session.worker_id.clone().unwrap_or_default();
        let worker2 = snap
            .pair_mode
            .then(|| snap.session.worker2_id.clone())
            .flatten();
        let process = snap.session.process_id.clone().unwrap_or_default();

        let start = Utc::now();
        if let Err(e) = self
            .records
            .open_records(
                port,
                &worker,
                worker2.as_deref(),
                &process,
                &status_val,
                start,
                &payload,
                RecordFields::from(&fields),
            )
            .await
        {
            warn!("[{}] instruction insert failed: {}", port, e);
            show_temp_error(self.display.as_ref(), port, ErrorCode::E06);
            return Ok(());
        }
        info!(
            "[{}] instruction accepted, status={}, worker={}",
            port, status_val, worker
        );

        let label = check_no_label(&fields.check_no);
        self.registry.with_entry(port, |entry| {
            entry.session.current_payload = Some(payload.clone());
            entry.session.check_no = Some(fields.check_no.clone());
            entry.session.check_no_label = label;
            entry.last_instruction = Some(payload.clone());
        });

        self.resolve_cached_labels(port).await;
        self.timers.start(port).await;

        let snap = self.snapshot(port)?;
        self.display.update(port, &self.frame_from(&snap));
        Ok(())
    }

    /// Branch 8: nothing matched. Persist an error record, preserve the raw
    /// payload on disk, and flag the station.
    async fn handle_error(&self, port: &str, raw: &str) -> anyhow::Result<()> {
        let truncated = truncate_utf8(raw, ERROR_PAYLOAD_MAX_BYTES);

        match self.audit.write_raw_payload(port, raw) {
            Ok(path) => info!("[{}] raw payload preserved at {}", port, path.display()),
            Err(e) => warn!("[{}] failed to preserve raw payload: {}", port, e),
        }

        let snap = self.snapshot(port)?;
        let worker = snap.session.worker_id.clone().unwrap_or_default();
        let process = snap.session.process_id.clone().unwrap_or_default();

        let insert = self
            .records
            .open_records(
                port,
                &worker,
                None,
                &process,
                ERROR_STATUS,
                Utc::now(),
                truncated,
                RecordFields::default(),
            )
            .await;

        match insert {
            Ok(()) => {
                let mut frame = self.frame_from(&snap);
                frame.status = ERROR_STATUS.to_string();
                self.display.update(port, &frame);
                show_temp_error(self.display.as_ref(), port, ErrorCode::E05);
            }
            Err(e) => {
                warn!("[{}] error record insert failed: {}", port, e);
                show_temp_error(self.display.as_ref(), port, ErrorCode::E08);
            }
        }
        Ok(())
    }

    /// Fill worker/process from the port configuration (or the hard fallbacks)
    /// when nothing has been scanned yet; records must never go out blank.
    fn ensure_identity_defaults(&self, cfg: &PortConfig) {
        self.registry.with_entry(&cfg.device, |entry| {
            if entry.session.worker_id.is_none() {
                entry.session.worker_id = Some(
                    cfg.default_worker
                        .clone()
                        .unwrap_or_else(|| FALLBACK_WORKER.to_string()),
                );
            }
            if entry.session.process_id.is_none() {
                entry.session.process_id = Some(
                    cfg.default_process
                        .clone()
                        .unwrap_or_else(|| FALLBACK_PROCESS.to_string()),
                );
            }
        });
    }

    /// Resolve cached worker/process display labels when they are still empty
    /// (station started from config defaults without any scans).
    async fn resolve_cached_labels(&self, port: &str) {
        let Some(snap) = self.registry.snapshot(port) else {
            return;
        };
        if snap.session.worker_label.is_empty() {
            if let Some(worker) = &snap.session.worker_id {
                let label = self.worker_label(port, worker).await;
                self.registry.with_entry(port, |entry| {
                    entry.session.worker_label = label;
                });
            }
        }
        if snap.session.process_label.is_empty() {
            if let Some(process) = snap.session.process_id.clone() {
                let label = match acquire_with_retry(|| {
                    self.records.store().resolve_process_label(&process)
                })
                .await
                {
                    Ok(Some(label)) => label,
                    Ok(None) => UNREGISTERED_LABEL.to_string(),
                    Err(_) => UNREGISTERED_LABEL.to_string(),
                };
                self.registry.with_entry(port, |entry| {
                    entry.session.process_label = label;
                });
            }
        }
    }
}

fn discriminant_name(kind: &QrKind<'_>) -> &'static str {
    match kind {
        QrKind::EndOrSame => "end-or-same",
        QrKind::StatusCode(_) => "status",
        QrKind::ProcessCode => "process",
        QrKind::WorkerCode(_) => "worker",
        QrKind::IndirectWork { .. } => "indirect",
        QrKind::Instruction(_) => "instruction",
        QrKind::Unrecognized => "unrecognized",
    }
}
