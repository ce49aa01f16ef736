//! # Fallback Audit Log
//!
//! Whenever the persistence step for a scan fails, one line lands here so the
//! scan is never silently lost. The log is append-only, size-rotated with a
//! bounded generation count, and locked with an advisory file lock so
//! concurrent port loops cannot interleave half-written lines.
//!
//! Line format:
//!
//! ```text
//! 2025-07-01 09:14:02, close_records, DB_ERROR, port=/dev/ttyACM0, payload=..., err=...
//! ```
//!
//! The auditor itself must never take the station down: every failure inside
//! it is logged and swallowed.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use log::warn;

use crate::config::FallbackConfig;
use crate::logutil::escape_log;

const LOG_FILE_NAME: &str = "fallback_log.txt";

pub struct FallbackAudit {
    dir: PathBuf,
    log_path: PathBuf,
    max_bytes: u64,
    max_generations: u32,
    guard: std::sync::Mutex<()>,
}

impl FallbackAudit {
    /// Create the auditor, ensuring its directory exists.
    pub fn new(config: &FallbackConfig) -> anyhow::Result<Self> {
        let dir = PathBuf::from(&config.dir);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: dir.join(LOG_FILE_NAME),
            dir,
            max_bytes: config.max_bytes,
            max_generations: config.max_generations,
            guard: std::sync::Mutex::new(()),
        })
    }

    /// Append one audit line. Never fails outward.
    pub fn append(
        &self,
        context: &str,
        status: &str,
        port: &str,
        payload: &str,
        err: Option<&str>,
    ) {
        let _guard = self.guard.lock().unwrap_or_else(|poison| poison.into_inner());
        if let Err(e) = self.try_append(context, status, port, payload, err) {
            warn!("fallback audit append failed: {}", e);
        }
    }

    fn try_append(
        &self,
        context: &str,
        status: &str,
        port: &str,
        payload: &str,
        err: Option<&str>,
    ) -> std::io::Result<()> {
        self.rotate_if_needed()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.lock_exclusive()?;
        let ts = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let err_part = err.map(|e| format!(", err={}", e)).unwrap_or_default();
        let line = format!(
            "{}, {}, {}, port={}, payload={}{}",
            ts,
            context,
            status,
            port,
            escape_log(payload),
            err_part
        );
        let result = writeln!(file, "{}", line);
        let _ = FileExt::unlock(&file);
        result
    }

    /// Shift generations when the active log exceeds its size budget:
    /// `.{n-1}` → `.{n}` for n descending, active → `.1`, oldest dropped.
    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match fs::metadata(&self.log_path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()), // nothing to rotate yet
        };
        if size < self.max_bytes {
            return Ok(());
        }

        let generation = |n: u32| -> PathBuf {
            self.dir.join(format!("{}.{}", LOG_FILE_NAME, n))
        };

        let oldest = generation(self.max_generations);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.max_generations).rev() {
            let from = generation(n);
            if from.exists() {
                fs::rename(&from, generation(n + 1))?;
            }
        }
        fs::rename(&self.log_path, generation(1))?;
        Ok(())
    }

    /// Persist one raw payload that could not be handled at all, as its own
    /// timestamped file. Returns the path for logging.
    pub fn write_raw_payload(&self, port: &str, payload: &str) -> std::io::Result<PathBuf> {
        let ts = Utc::now().format("%Y%m%d%H%M%S%3f");
        let path = self.dir.join(format!("error{}.txt", ts));
        let body = format!("port={}\npayload={}\n", port, payload);
        fs::write(&path, body)?;
        Ok(path)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audit(dir: &Path, max_bytes: u64) -> FallbackAudit {
        FallbackAudit::new(&FallbackConfig {
            dir: dir.to_string_lossy().into_owned(),
            max_bytes,
            max_generations: 3,
        })
        .expect("audit")
    }

    #[test]
    fn appends_one_line_per_failure() {
        let dir = tempfile::tempdir().unwrap();
        let audit = audit(dir.path(), 1024 * 1024);

        audit.append("insert_records", "DB_ERROR", "/dev/ttyACM0", "PAYLOAD", Some("boom"));
        audit.append("close_records", "DB_ERROR", "/dev/ttyACM0", "PAYLOAD", None);

        let content = fs::read_to_string(audit.log_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("insert_records"));
        assert!(lines[0].contains("err=boom"));
        assert!(lines[1].contains("close_records"));
        assert!(!lines[1].contains("err="));
    }

    #[test]
    fn payload_control_bytes_stay_single_line() {
        let dir = tempfile::tempdir().unwrap();
        let audit = audit(dir.path(), 1024 * 1024);

        audit.append("insert_records", "DB_ERROR", "p", "A\nB\rC", None);
        let content = fs::read_to_string(audit.log_path()).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("A\\nB\\rC"));
    }

    #[test]
    fn rotation_keeps_bounded_generations() {
        let dir = tempfile::tempdir().unwrap();
        let audit = audit(dir.path(), 64); // tiny budget to force rotation

        for i in 0..40 {
            audit.append("ctx", "DB_ERROR", "p", &format!("payload-{}", i), None);
        }

        assert!(audit.log_path().exists());
        assert!(dir.path().join("fallback_log.txt.1").exists());
        // Never more than max_generations rotated files.
        assert!(!dir.path().join("fallback_log.txt.4").exists());
    }

    #[test]
    fn raw_payload_files_are_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let audit = audit(dir.path(), 1024);

        let path = audit.write_raw_payload("/dev/ttyACM0", "garbled\u{fffd}data").unwrap();
        assert!(path.exists());
        let body = fs::read_to_string(path).unwrap();
        assert!(body.contains("garbled"));
    }
}
