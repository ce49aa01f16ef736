//! # Scantrack - Work-Session Tracking for Scan Stations
//!
//! Scantrack ingests barcode/QR scan events from serial-attached scanners, one
//! scanner per physical work station, and turns them into a consistent stream of
//! work-session records (who is working, on what process, since when) persisted
//! to an embedded store, while driving a live per-station status display.
//!
//! ## Features
//!
//! - **Per-Port Ingestion**: One independent reader per configured serial port,
//!   with frame reassembly, lossy decoding, and bounded reconnect/backoff.
//! - **Scan Dispatch**: Priority-ordered classification of scan payloads
//!   (end/status/process/worker/indirect/instruction) routed to exactly one handler.
//! - **Pair Work**: Two operators can share one station; worker scans inside a
//!   rolling 5-second window promote the station to pair mode with synchronized
//!   open/close records for both operators.
//! - **Durable Records**: Work intervals persisted to a sled-backed record store,
//!   with a fallback audit log so no scan is ever silently lost.
//! - **Live Display**: A cancellable per-port timer task renders elapsed time and
//!   alternates pair-worker names, coordinated through a generation counter so a
//!   superseded task can never render again.
//! - **Async Design**: Built with Tokio; blocking serial reads are isolated on
//!   dedicated tasks and feed async dispatch over channels.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scantrack::config::Config;
//! use scantrack::station::StationServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let config = Config::load("config.toml").await?;
//!
//!     // Create and start the station server
//!     let mut server = StationServer::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`station`] - Core session tracking: registry, dispatch, pairing, timers
//! - [`serial`] - Serial link management, frame reassembly, reconnect/backoff
//! - [`storage`] - Work-record persistence layer and master-label resolution
//! - [`qr`] - Scan payload classification and instruction field extraction
//! - [`display`] - Station display boundary and error overlays
//! - [`fallback`] - Append-only audit log for scans that failed to persist
//! - [`config`] - Configuration management and per-port validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ Station Server  │ ← Orchestration, one loop per port
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Serial Ingest   │ ← Frame reassembly, reconnect
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Dispatch        │ ← Classifier + handlers, session state
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Record Store    │ ← Work-interval persistence
//! └─────────────────┘
//! ```

pub mod config;
pub mod display;
pub mod fallback;
pub mod logutil;
pub mod qr;
pub mod serial;
pub mod station;
pub mod storage;
