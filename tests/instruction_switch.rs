//! Switch semantics: a different instruction closes the previous interval and
//! opens the new one, and a failed close never loses the new scan.

mod common;

use std::sync::atomic::Ordering;

use common::{Harness, TEST_PORT};
use scantrack::qr::fields::tests_support::sample_payload;
use scantrack::station::session::Status;

fn second_payload() -> String {
    let mut payload = sample_payload();
    payload.replace_range(0..4, "ZZZZ");
    payload
}

#[tokio::test]
async fn switch_closes_previous_and_opens_new() {
    let h = Harness::new();
    let first = sample_payload();
    let second = second_payload();

    h.scan(&first).await;
    h.scan(&second).await;

    assert_eq!(h.session_status(), Status::Working);
    let snap = h.registry.snapshot(TEST_PORT).unwrap();
    assert_eq!(snap.last_instruction.as_deref(), Some(second.as_str()));

    let all = h.store.all_records();
    assert_eq!(all.len(), 2);
    let closed = all.iter().find(|r| r.payload == first).unwrap();
    assert!(closed.end_time.is_some());
    let open = all.iter().find(|r| r.payload == second).unwrap();
    assert!(open.end_time.is_none());
}

#[tokio::test]
async fn failed_close_still_attempts_the_open() {
    let h = Harness::new();
    let first = sample_payload();
    let second = second_payload();

    h.scan(&first).await;

    // Close fails from here on; inserts still work.
    h.store.fail_close.store(true, Ordering::SeqCst);
    h.scan(&second).await;

    // The new scan was not lost: its record opened and became the accepted
    // instruction, while the old record is still (wrongly) open. Both-open is
    // the documented accepted risk of this path.
    let snap = h.registry.snapshot(TEST_PORT).unwrap();
    assert_eq!(snap.last_instruction.as_deref(), Some(second.as_str()));
    assert_eq!(h.session_status(), Status::Working);

    let open = h.store.open_records();
    assert_eq!(open.len(), 2);
    assert!(open.iter().any(|r| r.payload == second));

    // The failure landed in the fallback audit, not in silence.
    assert!(h.display.error_lines().iter().any(|l| l.contains("E08")));
}

#[tokio::test]
async fn switch_consumes_a_pending_status_override() {
    let h = Harness::new();
    let first = sample_payload();
    let second = second_payload();

    h.scan(&first).await;
    h.scan("END*END*END").await;

    // Status scanned with nothing open parks as a pending override...
    h.scan("rework").await;
    // ...and the next open consumes it.
    h.scan(&second).await;

    let open = h.store.open_records();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].status, "rework");

    // One-shot: ending and opening again reverts to the default label.
    h.scan("END*END*END").await;
    h.scan(&first).await;
    let open = h.store.open_records();
    assert_eq!(open[0].status, "operation");
}
