//! Lock-guarded arena of per-port station state.
//!
//! All mutable cross-task state lives here: session, pair window, last
//! accepted instruction, connection flag, and the display-timer generation
//! counter. One coarse lock guards the whole arena; holders only ever take a
//! snapshot copy or apply a small mutation, never hold it across I/O or a
//! persistence call.

use std::collections::HashMap;
use std::sync::Mutex;

use super::pairing::PairState;
use super::session::Session;

/// Everything the engine tracks for one port.
#[derive(Debug)]
pub struct StationEntry {
    pub session: Session,
    pub pair: PairState,
    /// The most recently accepted standard instruction; duplicate detection
    /// and close targeting key off this.
    pub last_instruction: Option<String>,
    pub connected: bool,
    /// Monotonic display-timer generation. Bumped on every timer (re)start and
    /// stop; a timer task that observes a different value than it captured
    /// must exit without rendering.
    pub timer_gen: u64,
}

impl StationEntry {
    fn new(session: Session) -> Self {
        StationEntry {
            session,
            pair: PairState::new(),
            last_instruction: None,
            connected: false,
            timer_gen: 0,
        }
    }
}

/// Read-only copy handed to the timer task and to handlers that must not hold
/// the lock while doing I/O.
#[derive(Debug, Clone)]
pub struct StationSnapshot {
    pub session: Session,
    pub pair_mode: bool,
    pub last_instruction: Option<String>,
    pub timer_gen: u64,
}

#[derive(Default)]
pub struct StationRegistry {
    inner: Mutex<HashMap<String, StationEntry>>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a port at startup. Later registrations replace the entry;
    /// entries are only removed at process shutdown.
    pub fn register(&self, port: &str, session: Session) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.insert(port.to_string(), StationEntry::new(session));
    }

    pub fn ports(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("registry lock");
        inner.keys().cloned().collect()
    }

    /// Snapshot copy of one port's state.
    pub fn snapshot(&self, port: &str) -> Option<StationSnapshot> {
        let inner = self.inner.lock().expect("registry lock");
        inner.get(port).map(|entry| StationSnapshot {
            session: entry.session.clone(),
            pair_mode: entry.pair.pair_mode,
            last_instruction: entry.last_instruction.clone(),
            timer_gen: entry.timer_gen,
        })
    }

    /// Apply a small mutation to one port's entry under the lock.
    pub fn with_entry<R>(&self, port: &str, f: impl FnOnce(&mut StationEntry) -> R) -> Option<R> {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.get_mut(port).map(f)
    }

    pub fn last_instruction(&self, port: &str) -> Option<String> {
        let inner = self.inner.lock().expect("registry lock");
        inner.get(port).and_then(|e| e.last_instruction.clone())
    }

    pub fn set_connected(&self, port: &str, connected: bool) {
        self.with_entry(port, |entry| entry.connected = connected);
    }

    pub fn is_connected(&self, port: &str) -> bool {
        let inner = self.inner.lock().expect("registry lock");
        inner.get(port).map(|e| e.connected).unwrap_or(false)
    }

    /// Bump and return the port's timer generation. Any running timer task
    /// holding the previous value becomes stale immediately.
    pub fn bump_timer_gen(&self, port: &str) -> u64 {
        self.with_entry(port, |entry| {
            entry.timer_gen += 1;
            entry.timer_gen
        })
        .unwrap_or(0)
    }

    pub fn timer_gen(&self, port: &str) -> u64 {
        let inner = self.inner.lock().expect("registry lock");
        inner.get(port).map(|e| e.timer_gen).unwrap_or(0)
    }
}
