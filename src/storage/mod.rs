//! # Storage Module - Work-Record Persistence Layer
//!
//! This module defines the record-store contract the session engine writes
//! through, plus the embedded sled-backed implementation used in production.
//!
//! ## Contract
//!
//! The engine only ever needs a handful of operations:
//!
//! - [`RecordStore::insert`] - open one work interval
//! - [`RecordStore::close_latest_open`] - close the newest open interval for a payload
//! - [`RecordStore::find_latest_open`] - look up the newest open interval for a payload
//! - [`RecordStore::update_open_status`] - re-label the newest open interval for a worker/process
//! - label resolution for workers, processes, and indirect-work codes
//!
//! All calls are transactional per logical step and safe to retry at the
//! acquisition layer only; business failures roll back just their own unit.
//!
//! ## Open-Record Invariant
//!
//! The engine enforces at most one open record (null `end_time`) per
//! (worker, process) pair. In pair mode exactly two synchronized open records
//! exist, one per operator, sharing payload, process, and start time.
//!
//! ## Error Taxonomy
//!
//! [`StoreError::Transient`] marks acquisition-layer failures (store not
//! reachable yet) that the caller may retry with backoff. Everything else is a
//! business failure for the current unit of work.

pub mod sled_store;

pub use sled_store::SledRecordStore;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::qr::fields::InstructionFields;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached/acquired; safe to retry with backoff.
    #[error("record store unavailable: {0}")]
    Transient(String),
    /// A constraint was violated; the unit of work was rolled back.
    #[error("record constraint violated: {0}")]
    Constraint(String),
    /// Any other backend failure; the unit of work was rolled back.
    #[error("record store failure: {0}")]
    Backend(String),
}

pub type RecordId = u64;

/// Instruction-derived columns carried on a persisted record. Every field is
/// optional: indirect-work and error records persist without extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFields {
    pub order_no: Option<String>,
    pub order_sub_no: Option<String>,
    pub check_no: Option<String>,
    pub unit_no: Option<String>,
    pub site_code: Option<String>,
    pub load_proc_code: Option<String>,
    pub pre_proc_code: Option<String>,
    pub post_proc_code: Option<String>,
    pub product_group: Option<String>,
    pub production_date: Option<NaiveDate>,
    pub check_sub_no: Option<String>,
    pub ship_date: Option<String>,
    pub ship_place: Option<String>,
    pub customer_order_no: Option<String>,
    pub body_class: Option<String>,
    pub product_name: Option<String>,
    pub model_code: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub origin_code: Option<String>,
    pub category_code: Option<String>,
}

impl From<&InstructionFields> for RecordFields {
    fn from(f: &InstructionFields) -> Self {
        RecordFields {
            order_no: Some(f.order_no.clone()),
            order_sub_no: Some(f.order_sub_no.clone()),
            check_no: Some(f.check_no.clone()),
            unit_no: Some(f.unit_no.clone()),
            site_code: Some(f.site_code.clone()),
            load_proc_code: Some(f.load_proc_code.clone()),
            pre_proc_code: Some(f.pre_proc_code.clone()),
            post_proc_code: Some(f.post_proc_code.clone()),
            product_group: Some(f.product_group.clone()),
            production_date: Some(f.production_date),
            check_sub_no: Some(f.check_sub_no.clone()),
            ship_date: Some(f.ship_date.clone()),
            ship_place: Some(f.ship_place.clone()),
            customer_order_no: Some(f.customer_order_no.clone()),
            body_class: Some(f.body_class.clone()),
            product_name: Some(f.product_name.clone()),
            model_code: Some(f.model_code.clone()),
            width: Some(f.width.clone()),
            height: Some(f.height.clone()),
            origin_code: Some(f.origin_code.clone()),
            category_code: Some(f.category_code.clone()),
        }
    }
}

/// A work interval about to be opened.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub worker_id: String,
    pub process_id: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub payload: String,
    pub fields: RecordFields,
}

/// A persisted work interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRecord {
    pub id: RecordId,
    pub worker_id: String,
    pub process_id: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub work_secs: Option<i64>,
    pub payload: String,
    pub fields: RecordFields,
}

/// A resolved indirect-work master row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndirectWork {
    /// Label persisted as the record status.
    pub status_label: String,
    /// Fixed-width (6 character) station display label.
    pub display_label: String,
}

/// The persistence contract consumed by the session engine.
pub trait RecordStore: Send + Sync {
    /// Open one work interval; returns the new record id.
    fn insert(&self, record: NewRecord) -> Result<RecordId, StoreError>;

    /// Close the newest open record for `payload` within the lookback window.
    ///
    /// When `worker`/`process` are given, they overwrite the stored columns at
    /// close time (the session is the source of truth for who finished the
    /// work). Returns the number of rows closed (0 or 1).
    fn close_latest_open(
        &self,
        payload: &str,
        worker: Option<&str>,
        process: Option<&str>,
    ) -> Result<u32, StoreError>;

    /// Newest open record for `payload`, if any.
    fn find_latest_open(&self, payload: &str) -> Result<Option<WorkRecord>, StoreError>;

    /// Re-label the newest open record for (worker, process). Returns rows
    /// updated (0 or 1).
    fn update_open_status(
        &self,
        worker: &str,
        process: &str,
        status: &str,
    ) -> Result<u32, StoreError>;

    /// Short display label for a worker, absent when unregistered.
    fn resolve_worker_label(&self, worker_id: &str) -> Result<Option<String>, StoreError>;

    /// Short display label for a process, absent when unregistered.
    fn resolve_process_label(&self, process_id: &str) -> Result<Option<String>, StoreError>;

    /// Indirect-work master row for a code, absent when unregistered.
    fn resolve_indirect_work(&self, code: &str) -> Result<Option<IndirectWork>, StoreError>;
}
