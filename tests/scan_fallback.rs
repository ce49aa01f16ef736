//! Fallback path: unrecognized payloads are persisted as error records with
//! the raw scan preserved on disk, and persistence failures land in the audit
//! log instead of vanishing.

mod common;

use std::fs;
use std::sync::atomic::Ordering;

use common::{Harness, TEST_PORT};
use scantrack::qr::fields::tests_support::sample_payload;
use scantrack::station::session::Status;

#[tokio::test]
async fn unrecognized_payload_persists_an_error_record() {
    let h = Harness::new();

    h.scan("garbled!!scan##data").await;

    let all = h.store.all_records();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, "E05:scan error");
    assert_eq!(all[0].payload, "garbled!!scan##data");
    // No extraction was applied.
    assert!(all[0].fields.order_no.is_none());

    // The transient E05 overlay went up; the session never started working.
    assert!(h.display.error_lines().iter().any(|l| l.contains("E05")));
    assert_eq!(h.session_status(), Status::Waiting);
}

#[tokio::test]
async fn raw_payload_is_preserved_on_disk() {
    let h = Harness::new();

    h.scan("not-a-real-code").await;

    let entries: Vec<_> = fs::read_dir(&h.fallback_dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("error"))
        .collect();
    assert_eq!(entries.len(), 1);
    let body = fs::read_to_string(entries[0].path()).unwrap();
    assert!(body.contains("not-a-real-code"));
    assert!(body.contains(TEST_PORT));
}

#[tokio::test]
async fn oversized_error_payload_is_truncated_for_the_store() {
    let h = Harness::new();

    // 600 bytes of junk; the persisted payload is capped at 400.
    let big = "x".repeat(600);
    h.scan(&big).await;

    let all = h.store.all_records();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].payload.len(), 400);
}

#[tokio::test]
async fn failed_insert_is_audited_not_silent() {
    let h = Harness::new();
    let payload = sample_payload();

    h.store.fail_insert.store(true, Ordering::SeqCst);
    h.scan(&payload).await;

    // Nothing persisted, but the scan left a trace in the audit log.
    assert!(h.store.all_records().is_empty());
    let log = fs::read_to_string(h.fallback_dir.join("fallback_log.txt")).unwrap();
    assert!(log.contains("open_records"));
    assert!(log.contains("DB_ERROR"));
    assert!(log.contains(TEST_PORT));

    // The station showed the store-write overlay instead of starting work.
    assert!(h.display.error_lines().iter().any(|l| l.contains("E06")));
}

#[tokio::test]
async fn failed_close_on_end_is_audited_and_session_still_ends() {
    let h = Harness::new();
    let payload = sample_payload();

    h.scan(&payload).await;
    h.store.fail_close.store(true, Ordering::SeqCst);
    h.scan("END*END*END").await;

    // Local state advances even though persistence failed.
    assert_eq!(h.session_status(), Status::Ended);
    let log = fs::read_to_string(h.fallback_dir.join("fallback_log.txt")).unwrap();
    assert!(log.contains("close_records"));
    assert!(h.display.error_lines().iter().any(|l| l.contains("E08")));
}

#[tokio::test]
async fn fallback_scans_never_disturb_session_bookkeeping() {
    let h = Harness::new();
    let payload = sample_payload();

    h.scan("rework").await; // park an override
    h.scan(&payload).await; // consumes it, opens a record
    h.scan("some-junk-scan").await;

    let snap = h.registry.snapshot(TEST_PORT).unwrap();
    // The accepted instruction and override state are untouched by junk.
    assert_eq!(snap.last_instruction.as_deref(), Some(payload.as_str()));
    assert!(snap.session.pending_status_override.is_none());
}
