//! # Station Core Module
//!
//! This module implements the session-tracking engine: everything between a
//! decoded scan line and a persisted work record lives here.
//!
//! ## Components
//!
//! - [`server`] - Station server: startup, per-port task orchestration, shutdown
//! - [`registry`] - Lock-guarded arena of per-port state
//! - [`session`] - Per-port session state and status lifecycle
//! - [`pairing`] - Rolling-window pair-work tracking
//! - [`dispatch`] - Scan classification routing and the eight handlers
//! - [`records`] - Work-record lifecycle (open/close/switch) with audit fallback
//! - [`timer`] - Per-port display timer tasks with generation-based supersession
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  StationServer  │ ← One reader + one dispatch task per port
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Dispatcher     │ ← Classifier branch → handler
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │  Registry +     │ ← Session / pairing state, record lifecycle,
//! │  Records/Timer  │   display timer supervision
//! └─────────────────┘
//! ```
//!
//! ## Session Lifecycle
//!
//! 1. A worker scans their badge (`WCD…`) - the station learns who is working
//! 2. A process code (`P…`) selects what they are working on
//! 3. An instruction code opens a persisted work interval and starts the timer
//! 4. A different instruction switches (close + open); the same one, or
//!    `END*END*END`, closes it
//! 5. Status codes annotate the open interval; indirect-work codes record
//!    non-production time

pub mod dispatch;
pub mod pairing;
pub mod records;
pub mod registry;
pub mod server;
pub mod session;
pub mod timer;

pub use dispatch::Dispatcher;
pub use registry::StationRegistry;
pub use server::StationServer;
