//! # Station Display Boundary
//!
//! The physical per-station panel (OLED/LCD) is an external collaborator; this
//! module defines the contract the session engine renders through, a console
//! implementation used when no panel is attached (and in tests), and the fixed
//! error-overlay tables.
//!
//! Every call is fire-and-forget from the engine's perspective: an
//! implementation must never propagate failures back into the ingestion path.
//! Implementations log their own trouble and move on.

use std::time::Duration;

use log::{info, warn};

/// One full frame of per-station status content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayFrame {
    /// Session status line, e.g. `WORKING` or a transient `* rework` note.
    pub status: String,
    /// Elapsed-time label, `MM:SS`.
    pub timer: String,
    /// Worker display label; in pair mode the engine alternates the names here.
    pub worker: String,
    /// Process display label.
    pub process: String,
    /// Check-number slot; indirect work shows its 6-char label here.
    pub check_no: String,
    /// Highlight the status line as a rework annotation.
    pub show_rework: bool,
    /// Blink indicator while a session is actively working.
    pub show_blink: bool,
}

/// Contract between the session engine and a station panel.
pub trait StationDisplay: Send + Sync {
    /// Replace the station's status frame.
    fn update(&self, port: &str, frame: &DisplayFrame);

    /// Show an error overlay. `duration` of `None` holds the overlay until the
    /// next update (used for fatal conditions).
    fn show_error(&self, port: &str, lines: &[&str], duration: Option<Duration>);

    /// Show a short free-form message (e.g. the raw line just scanned).
    fn display_message(&self, port: &str, text: &str, duration: Duration);

    /// Celebratory animation on pair-mode entry. Optional; default is a no-op.
    fn play_pair_animation(&self, _port: &str) {}
}

/// Console-backed display: renders frames into the log stream. This is the
/// production fallback when a station has no panel wired up, and the default
/// collaborator in tests.
#[derive(Debug, Default)]
pub struct ConsoleDisplay;

impl StationDisplay for ConsoleDisplay {
    fn update(&self, port: &str, frame: &DisplayFrame) {
        info!(
            "[{}] {} {} | worker={} process={} check={}{}{}",
            port,
            frame.status,
            frame.timer,
            frame.worker,
            frame.process,
            frame.check_no,
            if frame.show_rework { " *rework" } else { "" },
            if frame.show_blink { " *" } else { "" },
        );
    }

    fn show_error(&self, port: &str, lines: &[&str], duration: Option<Duration>) {
        match duration {
            Some(d) => warn!("[{}] error overlay ({}s): {}", port, d.as_secs(), lines.join(" / ")),
            None => warn!("[{}] error overlay (held): {}", port, lines.join(" / ")),
        }
    }

    fn display_message(&self, port: &str, text: &str, duration: Duration) {
        info!("[{}] message ({}s): {}", port, duration.as_secs(), text);
    }

    fn play_pair_animation(&self, port: &str) {
        info!("[{}] pair-mode animation", port);
    }
}

/// Error overlay codes shown on a station panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Record store unreachable at startup.
    E01,
    /// No usable port configuration.
    E02,
    /// Record store write failure.
    E03,
    /// Record store connection lost.
    E04,
    /// Malformed scan payload.
    E05,
    /// Store write failed, re-recorded as new.
    E06,
    /// Scanner device not detected.
    E07,
    /// Fallback audit engaged.
    E08,
    /// Unexpected failure.
    E10,
}

impl ErrorCode {
    /// Two-line overlay text for this code.
    pub fn lines(&self) -> [&'static str; 2] {
        match self {
            ErrorCode::E01 => ["E01 store connect error", "contact administrator"],
            ErrorCode::E02 => ["E02 configuration error", "contact administrator"],
            ErrorCode::E03 => ["E03 store write error", "contact administrator"],
            ErrorCode::E04 => ["E04 store disconnected", "restart the station"],
            ErrorCode::E05 => ["E05 scan code error", ""],
            ErrorCode::E06 => ["E06 store write error", "recorded as new"],
            ErrorCode::E07 => ["E07 scanner not found", "reconnect and restart"],
            ErrorCode::E08 => ["E08 fallback engaged", "please rescan"],
            ErrorCode::E10 => ["E10 unexpected error", "contact administrator"],
        }
    }

    /// Fatal codes are held on the panel; transient ones auto-dismiss.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::E01 | ErrorCode::E02 | ErrorCode::E03 | ErrorCode::E04 | ErrorCode::E07
        )
    }
}

/// Seconds a transient overlay stays up before auto-dismissing.
const TEMP_OVERLAY_SECS: u64 = 5;

/// Show an auto-dismissing error overlay.
pub fn show_temp_error(display: &dyn StationDisplay, port: &str, code: ErrorCode) {
    let lines = code.lines();
    display.show_error(port, &lines, Some(Duration::from_secs(TEMP_OVERLAY_SECS)));
}

/// Show a held error overlay for an unrecoverable condition.
pub fn show_fatal_error(display: &dyn StationDisplay, port: &str, code: ErrorCode) {
    let lines = code.lines();
    display.show_error(port, &lines, None);
}
