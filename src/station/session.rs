//! Per-port session state.
//!
//! One [`Session`] per work station, owned by the registry and mutated only by
//! dispatch handlers under the registry lock. The display timer reads it via
//! snapshot copies, never in place.

use chrono::{DateTime, Utc};

/// Work-session status shown on the station panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Waiting,
    Working,
    Ended,
    /// The serial link dropped and is being re-established.
    Retry,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Waiting => "WAITING",
            Status::Working => "WORKING",
            Status::Ended => "ENDED",
            Status::Retry => "RETRY",
        }
    }
}

/// Empty check-number display slot (6 columns).
pub const EMPTY_CHECK_NO: &str = "      ";

/// Initial timer label.
pub const ZERO_TIMER: &str = "00:00";

/// Mutable per-station state.
///
/// Invariant: `start_time.is_some()` exactly when `status == Working`.
#[derive(Debug, Clone)]
pub struct Session {
    pub status: Status,
    /// First (or only) operator.
    pub worker_id: Option<String>,
    /// Second operator, present only in pair mode.
    pub worker2_id: Option<String>,
    pub process_id: Option<String>,
    /// The payload currently reflected on the display.
    pub current_payload: Option<String>,
    pub worker_label: String,
    pub worker2_label: String,
    pub process_label: String,
    pub check_no: Option<String>,
    pub check_no_label: String,
    /// Frozen elapsed-time label rendered while not working.
    pub timer_label: String,
    pub start_time: Option<DateTime<Utc>>,
    /// One-shot status correction scanned while no record was open; consumed
    /// by the next record insert.
    pub pending_status_override: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Session {
            status: Status::Waiting,
            worker_id: None,
            worker2_id: None,
            process_id: None,
            current_payload: None,
            worker_label: String::new(),
            worker2_label: String::new(),
            process_label: String::new(),
            check_no: None,
            check_no_label: EMPTY_CHECK_NO.to_string(),
            timer_label: ZERO_TIMER.to_string(),
            start_time: None,
            pending_status_override: None,
        }
    }

    /// Mark the session as actively working from `now`.
    pub fn begin_work(&mut self, now: DateTime<Utc>) {
        self.status = Status::Working;
        self.start_time = Some(now);
        self.timer_label = ZERO_TIMER.to_string();
    }

    /// Mark the session ended, freezing the timer label at `final_timer`.
    pub fn end_work(&mut self, final_timer: String) {
        self.status = Status::Ended;
        self.start_time = None;
        self.timer_label = final_timer;
    }

    /// Consume the one-shot status override, falling back to `default`.
    pub fn take_status_override(&mut self, default: &str) -> String {
        self.pending_status_override
            .take()
            .unwrap_or_else(|| default.to_string())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Format an elapsed duration as `MM:SS` (minutes roll past 99 unclipped).
pub fn format_elapsed(secs: i64) -> String {
    let secs = secs.max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_time_tracks_working_status() {
        let mut session = Session::new();
        assert_eq!(session.status, Status::Waiting);
        assert!(session.start_time.is_none());

        session.begin_work(Utc::now());
        assert_eq!(session.status, Status::Working);
        assert!(session.start_time.is_some());

        session.end_work("01:23".to_string());
        assert_eq!(session.status, Status::Ended);
        assert!(session.start_time.is_none());
        assert_eq!(session.timer_label, "01:23");
    }

    #[test]
    fn status_override_is_one_shot() {
        let mut session = Session::new();
        session.pending_status_override = Some("rework".to_string());
        assert_eq!(session.take_status_override("operation"), "rework");
        assert_eq!(session.take_status_override("operation"), "operation");
    }

    #[test]
    fn elapsed_formatting() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(65), "01:05");
        assert_eq!(format_elapsed(6000), "100:00");
        assert_eq!(format_elapsed(-5), "00:00");
    }
}
