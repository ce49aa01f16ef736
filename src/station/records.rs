//! Record lifecycle: opening, switching, and closing persisted work intervals.
//!
//! Handlers never talk to the [`RecordStore`] directly; everything funnels
//! through here so acquisition retry, pair-mode fan-out, the zero-open-record
//! fallback, and audit logging live in one place. Each logical step (open /
//! close / status update) is its own unit of work: a failure rolls back only
//! that unit and lands in the fallback audit log.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::fallback::FallbackAudit;
use crate::storage::{NewRecord, RecordFields, RecordStore, StoreError};

/// Maximum unit-of-work acquisition attempts.
const MAX_ACQUIRE_ATTEMPTS: u32 = 5;

/// First acquisition-retry delay; doubles per attempt.
const ACQUIRE_BASE_DELAY: Duration = Duration::from_millis(500);

/// Retry `op` while it fails with [`StoreError::Transient`], up to
/// [`MAX_ACQUIRE_ATTEMPTS`] with exponential backoff. Business failures are
/// returned immediately; only acquisition is retried.
pub async fn acquire_with_retry<T>(
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut delay = ACQUIRE_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(StoreError::Transient(msg)) if attempt < MAX_ACQUIRE_ATTEMPTS => {
                warn!(
                    "store acquisition failed (attempt {}/{}): {}",
                    attempt, MAX_ACQUIRE_ATTEMPTS, msg
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// The worker/process/payload tuple a close targets.
#[derive(Debug, Clone)]
pub struct CloseTarget<'a> {
    pub payload: &'a str,
    pub worker: Option<&'a str>,
    pub worker2: Option<&'a str>,
    pub process: Option<&'a str>,
    pub pair_mode: bool,
}

pub struct RecordLifecycle {
    store: Arc<dyn RecordStore>,
    audit: Arc<FallbackAudit>,
}

impl RecordLifecycle {
    pub fn new(store: Arc<dyn RecordStore>, audit: Arc<FallbackAudit>) -> Self {
        Self { store, audit }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Open one work interval, plus the synchronized second interval in pair
    /// mode. Both records share status, payload, fields, and start time; only
    /// the worker differs.
    #[allow(clippy::too_many_arguments)]
    pub async fn open_records(
        &self,
        port: &str,
        worker: &str,
        worker2: Option<&str>,
        process: &str,
        status: &str,
        start_time: DateTime<Utc>,
        payload: &str,
        fields: RecordFields,
    ) -> Result<(), StoreError> {
        let first = NewRecord {
            worker_id: worker.to_string(),
            process_id: process.to_string(),
            status: status.to_string(),
            start_time,
            payload: payload.to_string(),
            fields: fields.clone(),
        };
        if let Err(e) = acquire_with_retry(|| self.store.insert(first.clone())).await {
            self.audit
                .append("open_records", "DB_ERROR", port, payload, Some(&e.to_string()));
            return Err(e);
        }

        if let Some(second) = worker2 {
            if second.is_empty() || second == worker {
                warn!("[{}] skipping second record for worker '{}'", port, second);
                return Ok(());
            }
            let mut record = first;
            record.worker_id = second.to_string();
            if let Err(e) = acquire_with_retry(|| self.store.insert(record.clone())).await {
                self.audit.append(
                    "open_records_second",
                    "DB_ERROR",
                    port,
                    payload,
                    Some(&e.to_string()),
                );
                return Err(e);
            }
            info!("[{}] pair record opened for second worker {}", port, second);
        }
        Ok(())
    }

    /// Close the open interval(s) for a payload: one per operator in pair
    /// mode, one in solo mode. When the normal close matches zero rows, fall
    /// back to closing by payload alone before giving up; if even that finds
    /// nothing, the raw payload is preserved on disk.
    pub async fn close_records(&self, port: &str, target: CloseTarget<'_>) -> Result<u32, StoreError> {
        let result = self.close_inner(&target).await;
        match result {
            Ok(rows) => {
                info!("[{}] closed {} record(s) for payload", port, rows);
                Ok(rows)
            }
            Err(e) => {
                self.audit.append(
                    "close_records",
                    "DB_ERROR",
                    port,
                    target.payload,
                    Some(&e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn close_inner(&self, target: &CloseTarget<'_>) -> Result<u32, StoreError> {
        let mut rows = 0;
        if let Some(worker) = target.worker {
            rows += acquire_with_retry(|| {
                self.store
                    .close_latest_open(target.payload, Some(worker), target.process)
            })
            .await?;
        }
        if target.pair_mode {
            if let Some(second) = target.worker2 {
                rows += acquire_with_retry(|| {
                    self.store
                        .close_latest_open(target.payload, Some(second), target.process)
                })
                .await?;
            }
        }

        if rows == 0 {
            rows = self.close_fallback(target.payload).await?;
        }
        Ok(rows)
    }

    /// Safety valve when the normal close misses: close the newest open
    /// record for the payload regardless of worker.
    async fn close_fallback(&self, payload: &str) -> Result<u32, StoreError> {
        let open = acquire_with_retry(|| self.store.find_latest_open(payload)).await?;
        if open.is_none() {
            warn!("no open record found for payload; nothing to close");
            return Ok(0);
        }
        let rows =
            acquire_with_retry(|| self.store.close_latest_open(payload, None, None)).await?;
        info!("fallback close matched {} record(s)", rows);
        Ok(rows)
    }

    /// Re-label the newest open record for (worker, process). Returns rows
    /// updated; audit on failure.
    pub async fn update_status(
        &self,
        port: &str,
        worker: &str,
        process: &str,
        label: &str,
    ) -> Result<u32, StoreError> {
        match acquire_with_retry(|| self.store.update_open_status(worker, process, label)).await {
            Ok(rows) => Ok(rows),
            Err(e) => {
                self.audit
                    .append("update_status", "DB_ERROR", port, label, Some(&e.to_string()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Paused clock: the backoff sleeps auto-advance, so this runs instantly.
    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_up_to_cap() {
        let calls = AtomicU32::new(0);
        let result = acquire_with_retry(|| -> Result<(), StoreError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Transient("not yet".into()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn business_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result = acquire_with_retry(|| -> Result<(), StoreError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Constraint("duplicate".into()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Constraint(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
