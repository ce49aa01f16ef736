//! # Serial Link Management
//!
//! One scanner per serial port, one blocking reader per scanner. Scanners are
//! one-way devices: they emit newline-delimited text frames and never answer,
//! so link health can only be inferred from read errors. The reader loop walks
//! an explicit state machine:
//!
//! ```text
//! Disconnected → Connecting → Connected → (Reading ⇄ IdlePoll) → Disconnected
//! ```
//!
//! On a read error it reconnects with bounded exponential backoff (base 1s,
//! doubling to a 30s cap, 3 retries). Exhausting the retries declares *this*
//! port fatally unreachable — its loop stops and a held error overlay goes up,
//! while every other port keeps running.
//!
//! Frame handling: decoded with UTF-8 replacement (a bad byte must not kill
//! the frame), split on `\n`, carriage returns and surrounding whitespace
//! stripped, empty frames discarded.

use std::time::Duration;

use log::{debug, info, warn};

/// Serial link lifecycle states, mostly for log readability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reading,
    IdlePoll,
}

/// Bounded exponential backoff schedule for reconnect attempts.
///
/// Yields one delay per remaining retry: base, base*2, base*4, … capped at
/// `cap`. Exhausting the iterator means the link is fatally unreachable.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
            max_attempts,
        }
    }

    /// The production schedule: 1s base, 30s cap, 3 retries.
    pub fn standard() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30), 3)
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32 << self.attempt.min(31);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempt += 1;
        Some(delay)
    }
}

/// Incremental line reassembly over raw serial chunks.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw chunk; undecodable bytes are replaced, never fatal.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
    }

    /// Pop the next complete frame, if one is buffered. Strips `\r` and
    /// surrounding whitespace; empty frames are discarded.
    pub fn next_frame(&mut self) -> Option<String> {
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf[..pos].trim_matches('\r').trim().to_string();
            self.buf.drain(..=pos);
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }
}

#[cfg(feature = "serial")]
pub use link::{open_link, reader_loop};

#[cfg(feature = "serial")]
mod link {
    use super::*;

    use std::io::Read;
    use std::sync::Arc;

    use serialport::SerialPort;
    use tokio::sync::{mpsc, watch};

    use crate::config::PortConfig;
    use crate::display::{show_fatal_error, show_temp_error, ErrorCode, StationDisplay};
    use crate::station::registry::StationRegistry;
    use crate::station::session::Status;

    fn data_bits(bits: u8) -> serialport::DataBits {
        match bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        }
    }

    fn parity(code: &str) -> serialport::Parity {
        match code {
            "E" => serialport::Parity::Even,
            "O" => serialport::Parity::Odd,
            _ => serialport::Parity::None,
        }
    }

    fn stop_bits(bits: u8) -> serialport::StopBits {
        if bits == 2 {
            serialport::StopBits::Two
        } else {
            serialport::StopBits::One
        }
    }

    /// Open one scanner link with the configured line parameters.
    pub fn open_link(cfg: &PortConfig) -> anyhow::Result<Box<dyn SerialPort>> {
        let port = serialport::new(&cfg.device, cfg.baud_rate)
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .data_bits(data_bits(cfg.data_bits))
            .parity(parity(&cfg.parity))
            .stop_bits(stop_bits(cfg.stop_bits))
            .open()
            .map_err(|e| anyhow::anyhow!("failed to open serial port {}: {}", cfg.device, e))?;
        info!("connected to scanner on {}", cfg.device);
        Ok(port)
    }

    /// Sleep in small slices so a shutdown request is honored mid-backoff.
    fn sleep_interruptible(total: Duration, shutdown: &watch::Receiver<bool>) -> bool {
        let slice = Duration::from_millis(100);
        let mut remaining = total;
        while remaining > Duration::ZERO {
            if *shutdown.borrow() {
                return false;
            }
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining -= step;
        }
        !*shutdown.borrow()
    }

    /// Re-establish a dropped link with the standard bounded backoff.
    /// Returns `None` when the retries are exhausted or shutdown was requested.
    fn reconnect(
        cfg: &PortConfig,
        display: &Arc<dyn StationDisplay>,
        shutdown: &watch::Receiver<bool>,
    ) -> Option<Box<dyn SerialPort>> {
        let mut backoff = Backoff::standard();
        let mut state = LinkState::Connecting;
        loop {
            if *shutdown.borrow() {
                return None;
            }
            debug!("[{}] link state {:?}", cfg.device, state);
            match open_link(cfg) {
                Ok(link) => {
                    info!("[{}] reconnect succeeded", cfg.device);
                    return Some(link);
                }
                Err(e) => {
                    warn!("[{}] reconnect attempt failed: {}", cfg.device, e);
                    show_temp_error(display.as_ref(), &cfg.device, ErrorCode::E07);
                    match backoff.next() {
                        Some(delay) => {
                            state = LinkState::Disconnected;
                            if !sleep_interruptible(delay, shutdown) {
                                return None;
                            }
                            state = LinkState::Connecting;
                        }
                        None => return None,
                    }
                }
            }
        }
    }

    /// Blocking per-port ingestion loop. Runs under `spawn_blocking`; frames
    /// go out over `frames`, reconnects are handled inline, and shutdown is
    /// observed at every poll boundary (reads use the configured timeout).
    pub fn reader_loop(
        cfg: PortConfig,
        mut link: Box<dyn SerialPort>,
        frames: mpsc::UnboundedSender<String>,
        registry: Arc<StationRegistry>,
        display: Arc<dyn StationDisplay>,
        shutdown: watch::Receiver<bool>,
    ) {
        let port = cfg.device.clone();
        let mut buffer = FrameBuffer::new();
        let mut chunk = [0u8; 512];

        registry.set_connected(&port, true);
        loop {
            if *shutdown.borrow() {
                break;
            }

            match link.read(&mut chunk) {
                Ok(0) => {
                    // Idle poll: nothing buffered, stay responsive to shutdown.
                    std::thread::sleep(Duration::from_millis(50));
                }
                Ok(n) => {
                    buffer.push_chunk(&chunk[..n]);
                    while let Some(line) = buffer.next_frame() {
                        if frames.send(line).is_err() {
                            // Dispatch side is gone; nothing left to do here.
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    // Bounded read timeout doubles as the idle poll.
                    continue;
                }
                Err(e) => {
                    warn!("[{}] read error, attempting reconnect: {}", port, e);
                    registry.set_connected(&port, false);
                    registry.with_entry(&port, |entry| {
                        if entry.session.status != Status::Working {
                            entry.session.status = Status::Retry;
                        }
                    });

                    match reconnect(&cfg, &display, &shutdown) {
                        Some(new_link) => {
                            link = new_link;
                            registry.set_connected(&port, true);
                            // "retrying…" frame; the next real event overwrites it.
                            if let Some(snap) = registry.snapshot(&port) {
                                let frame = crate::display::DisplayFrame {
                                    status: Status::Retry.label().to_string(),
                                    timer: snap.session.timer_label.clone(),
                                    worker: snap.session.worker_label.clone(),
                                    process: snap.session.process_label.clone(),
                                    check_no: snap.session.check_no_label.clone(),
                                    show_rework: false,
                                    show_blink: false,
                                };
                                display.update(&port, &frame);
                            }
                        }
                        None => {
                            if *shutdown.borrow() {
                                break;
                            }
                            // This port is fatally unreachable; the rest of the
                            // process keeps serving its own ports.
                            log::error!("[{}] reconnect retries exhausted; stopping this port", port);
                            show_fatal_error(display.as_ref(), &port, ErrorCode::E07);
                            break;
                        }
                    }
                }
            }
        }
        registry.set_connected(&port, false);
        info!("[{}] reader loop stopped", port);
    }
}
