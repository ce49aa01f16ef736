//! Per-port display timer tasks.
//!
//! While a session is working, one task per port ticks at 1 Hz, rendering the
//! elapsed time and, in pair mode, alternating the displayed worker name on a
//! 2-second wall-clock bucket (a separate clock from the render tick).
//!
//! Supersession is the hard part: starting a new timer for a port must
//! guarantee the old task never renders again, even if its stop signal is
//! observed late. Two mechanisms stack:
//!
//! 1. a per-task stop signal (watch channel), signalled then joined under a
//!    bounded wait, and
//! 2. a per-port generation counter in the registry; the task captures its
//!    generation at spawn and re-checks the live value before every render.
//!
//! Either alone bounds cancellation latency; together a missed signal still
//! cannot produce two tasks rendering the same port.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::display::{DisplayFrame, StationDisplay};

use super::registry::{StationRegistry, StationSnapshot};
use super::session::{format_elapsed, Status};

/// Bounded wait for an outgoing timer task to acknowledge its stop signal.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_millis(1200);

struct TimerTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct TimerSupervisor {
    registry: Arc<StationRegistry>,
    display: Arc<dyn StationDisplay>,
    tasks: tokio::sync::Mutex<HashMap<String, TimerTask>>,
}

impl TimerSupervisor {
    pub fn new(registry: Arc<StationRegistry>, display: Arc<dyn StationDisplay>) -> Self {
        Self {
            registry,
            display,
            tasks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Start (or restart) the timer for a port. Marks the session working
    /// from now and guarantees any previous task is superseded before the
    /// new one spawns.
    pub async fn start(&self, port: &str) {
        let gen = self.registry.bump_timer_gen(port);
        self.halt_task(port).await;

        self.registry.with_entry(port, |entry| {
            entry.session.begin_work(Utc::now());
        });

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_timer(
            Arc::clone(&self.registry),
            Arc::clone(&self.display),
            port.to_string(),
            gen,
            stop_rx,
        ));

        let mut tasks = self.tasks.lock().await;
        tasks.insert(port.to_string(), TimerTask { stop_tx, handle });
    }

    /// Stop the timer for a port, freezing the elapsed label and marking the
    /// session ended. Renders one final ended frame.
    pub async fn stop(&self, port: &str) {
        self.registry.bump_timer_gen(port);
        self.halt_task(port).await;

        let final_frame = self.registry.with_entry(port, |entry| {
            let final_timer = match entry.session.start_time {
                Some(start) => format_elapsed((Utc::now() - start).num_seconds()),
                None => entry.session.timer_label.clone(),
            };
            entry.session.end_work(final_timer);
            render_frame(&entry.session, entry.pair.pair_mode, None)
        });

        if let Some(frame) = final_frame {
            self.display.update(port, &frame);
        }
    }

    /// Stop every port's timer (process shutdown).
    pub async fn stop_all(&self) {
        for port in self.registry.ports() {
            self.stop(&port).await;
        }
    }

    /// Signal-then-join the port's current task, if any, under a bounded wait.
    async fn halt_task(&self, port: &str) {
        let task = {
            let mut tasks = self.tasks.lock().await;
            tasks.remove(port)
        };
        let Some(task) = task else { return };

        let _ = task.stop_tx.send(true);
        match tokio::time::timeout(STOP_JOIN_TIMEOUT, task.handle).await {
            Ok(_) => debug!("[{}] timer task stopped", port),
            Err(_) => {
                // The generation check will retire it; it just can't render
                // for this port any more.
                warn!("[{}] timer task did not stop within timeout", port);
            }
        }
    }
}

/// Pick which worker name a pair-mode station shows right now: the 2-second
/// wall-clock bucket alternates between the two operators, independent of the
/// 1 Hz render tick.
fn pair_display_worker(snapshot: &StationSnapshot, unix_secs: i64) -> String {
    let session = &snapshot.session;
    if !snapshot.pair_mode || session.worker2_label.is_empty() {
        return session.worker_label.clone();
    }
    if (unix_secs / 2) % 2 == 0 {
        session.worker_label.clone()
    } else {
        session.worker2_label.clone()
    }
}

fn render_frame(
    session: &super::session::Session,
    pair_mode: bool,
    worker_override: Option<String>,
) -> DisplayFrame {
    let worker = worker_override.unwrap_or_else(|| {
        if pair_mode && !session.worker2_label.is_empty() {
            format!("{}+", session.worker_label)
        } else {
            session.worker_label.clone()
        }
    });
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

async fn run_timer(
    registry: Arc<StationRegistry>,
    display: Arc<dyn StationDisplay>,
    port: String,
    gen: u64,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_frame: Option<DisplayFrame> = None;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = interval.tick() => {}
        }

        // Supersession check before every render: a stale task must never
        // touch the display again, even if its stop signal went missing.
        if registry.timer_gen(&port) != gen {
            break;
        }

        let Some(snapshot) = registry.snapshot(&port) else {
            continue;
        };

        let now = Utc::now();
        let timer_label = match (snapshot.session.status, snapshot.session.start_time) {
            (Status::Working, Some(start)) => format_elapsed((now - start).num_seconds()),
            _ => snapshot.session.timer_label.clone(),
        };
        let shown_worker = pair_display_worker(&snapshot, now.timestamp());

        let mut frame = render_frame(&snapshot.session, snapshot.pair_mode, Some(shown_worker));
        frame.timer = timer_label.clone();

        // Only push to the display boundary when the content changed.
        if last_frame.as_ref() != Some(&frame) {
            // Re-check generation as late as possible before the render call.
            if registry.timer_gen(&port) != gen {
                break;
            }
            display.update(&port, &frame);
            last_frame = Some(frame);
            // Keep the cached label current so a stop freezes the right value.
            registry.with_entry(&port, |entry| {
                if entry.session.status == Status::Working {
                    entry.session.timer_label = timer_label;
                }
            });
        }
    }
    debug!("[{}] timer task gen {} exited", port, gen);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::session::Session;
    use std::sync::Mutex;

    /// Display double that records which generation rendered, via the frame's
    /// process label (seeded per start).
    #[derive(Default)]
    struct RecordingDisplay {
        frames: Mutex<Vec<DisplayFrame>>,
    }

    impl StationDisplay for RecordingDisplay {
        fn update(&self, _port: &str, frame: &DisplayFrame) {
            self.frames.lock().unwrap().push(frame.clone());
        }
        fn show_error(&self, _port: &str, _lines: &[&str], _duration: Option<Duration>) {}
        fn display_message(&self, _port: &str, _text: &str, _duration: Duration) {}
    }

    #[test]
    fn pair_alternation_follows_two_second_buckets() {
        let registry = StationRegistry::new();
        registry.register("p", Session::new());
        registry.with_entry("p", |entry| {
            entry.session.worker_label = "ANDO".to_string();
            entry.session.worker2_label = "SATO".to_string();
            entry.pair.pair_mode = true;
        });
        let snapshot = registry.snapshot("p").unwrap();

        assert_eq!(pair_display_worker(&snapshot, 0), "ANDO");
        assert_eq!(pair_display_worker(&snapshot, 1), "ANDO");
        assert_eq!(pair_display_worker(&snapshot, 2), "SATO");
        assert_eq!(pair_display_worker(&snapshot, 3), "SATO");
        assert_eq!(pair_display_worker(&snapshot, 4), "ANDO");
    }

    #[test]
    fn solo_stations_never_alternate() {
        let registry = StationRegistry::new();
        registry.register("p", Session::new());
        registry.with_entry("p", |entry| {
            entry.session.worker_label = "ANDO".to_string();
        });
        let snapshot = registry.snapshot("p").unwrap();
        for t in 0..8 {
            assert_eq!(pair_display_worker(&snapshot, t), "ANDO");
        }
    }

    #[tokio::test]
    async fn superseded_task_never_renders_again() {
        let registry = Arc::new(StationRegistry::new());
        registry.register("p", Session::new());
        let display = Arc::new(RecordingDisplay::default());
        let supervisor = TimerSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&display) as Arc<dyn StationDisplay>,
        );

        supervisor.start("p").await;
        let first_gen = registry.timer_gen("p");

        // Restart while the first task is mid-flight; the generation moves on.
        supervisor.start("p").await;
        let second_gen = registry.timer_gen("p");
        assert!(second_gen > first_gen);

        // Give the live task a moment, then stop everything.
        tokio::time::sleep(Duration::from_millis(50)).await;
        supervisor.stop("p").await;

        // After the stop, the generation has moved past both tasks; nothing
        // may render any more.
        let rendered = display.frames.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(display.frames.lock().unwrap().len(), rendered);
        assert_eq!(registry.snapshot("p").unwrap().session.status, Status::Ended);
    }
}
