//! Pair-work tracking.
//!
//! Each station keeps a rolling window of recently scanned worker ids. Two
//! operators scanning within the window share the station (pair mode); the
//! window collapsing back to one operator drops it to solo. The mode is
//! recomputed fresh from the window on every worker scan, never incremented.

use chrono::{DateTime, Duration, Utc};

/// Trailing window inside which consecutive worker scans pair up.
pub const PAIR_WINDOW_SECS: i64 = 5;

/// Upper bound on remembered worker scans.
const MAX_RECENT: usize = 3;

/// Operator assignment derived from the rolling window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Solo(String),
    /// `(first, second)` — the first scan stays anchored as the primary
    /// operator; a third scan rotates out the middle partner.
    Pair(String, String),
}

/// Result of observing one worker scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairOutcome {
    pub assignment: Assignment,
    /// True exactly on the transition into pair mode (solo → pair).
    pub entered_pair: bool,
}

#[derive(Debug, Clone)]
pub struct PairState {
    pub pair_mode: bool,
    recent_workers: Vec<String>,
    last_worker_at: Option<DateTime<Utc>>,
}

impl PairState {
    pub fn new() -> Self {
        PairState {
            pair_mode: false,
            recent_workers: Vec::new(),
            last_worker_at: None,
        }
    }

    /// Record one worker scan at `now` and derive the new assignment.
    pub fn observe(&mut self, worker_id: &str, now: DateTime<Utc>) -> PairOutcome {
        if let Some(last) = self.last_worker_at {
            if now - last > Duration::seconds(PAIR_WINDOW_SECS) {
                self.recent_workers.clear();
            }
        }

        self.recent_workers.push(worker_id.to_string());
        if self.recent_workers.len() > MAX_RECENT {
            self.recent_workers.remove(0);
        }
        self.last_worker_at = Some(now);

        let was_pair = self.pair_mode;
        let assignment = match self.recent_workers.len() {
            1 => Assignment::Solo(self.recent_workers[0].clone()),
            2 => Assignment::Pair(
                self.recent_workers[0].clone(),
                self.recent_workers[1].clone(),
            ),
            _ => Assignment::Pair(
                self.recent_workers[0].clone(),
                self.recent_workers[2].clone(),
            ),
        };
        self.pair_mode = matches!(assignment, Assignment::Pair(_, _));

        PairOutcome {
            assignment,
            entered_pair: !was_pair && self.pair_mode,
        }
    }
}

impl Default for PairState {
    fn default() -> Self {
        Self::new()
    }
}
