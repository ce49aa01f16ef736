//! Indirect-work scans: master-table resolution, immediate record open with a
//! forced Working status, and the preserved pending override.

mod common;

use common::{Harness, TEST_PORT};
use scantrack::station::session::Status;

#[tokio::test]
async fn resolved_code_opens_a_record_with_master_labels() {
    let h = Harness::new();
    h.store.seed_indirect("A02", "5S cleanup", "CLEAN ");

    h.scan("ID:A02-0001").await;

    assert_eq!(h.session_status(), Status::Working);
    let open = h.store.open_records();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].status, "5S cleanup");
    // The factory from the payload lands in the process-code columns.
    assert_eq!(open[0].fields.load_proc_code.as_deref(), Some("0001"));

    // The 6-char display label occupies the check-number slot.
    let snap = h.registry.snapshot(TEST_PORT).unwrap();
    assert_eq!(snap.session.check_no_label, "CLEAN ");
    assert!(snap.session.check_no.is_none());
}

#[tokio::test]
async fn unresolved_code_uses_the_fixed_fallback_labels() {
    let h = Harness::new();

    h.scan("ID:ZZZ-0001").await;

    let open = h.store.open_records();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].status, "indirect work");
    let snap = h.registry.snapshot(TEST_PORT).unwrap();
    assert_eq!(snap.session.check_no_label, "INDIR ");
}

#[tokio::test]
async fn missing_factory_falls_back_to_the_port_config() {
    let h = Harness::new();
    h.store.seed_indirect("A01", "morning meeting", "MEET  ");

    // No `-factory` part; the harness config carries factory_code 000100.
    h.scan("ID:A01").await;

    let open = h.store.open_records();
    assert_eq!(open[0].fields.load_proc_code.as_deref(), Some("000100"));
    assert_eq!(open[0].fields.post_proc_code.as_deref(), Some("000100"));
}

#[tokio::test]
async fn pending_override_is_ignored_and_preserved() {
    let h = Harness::new();
    h.store.seed_indirect("A01", "morning meeting", "MEET  ");

    h.scan("rework").await;
    h.scan("ID:A01-0001").await;

    // The indirect record takes the master label, not the override...
    let open = h.store.open_records();
    assert_eq!(open[0].status, "morning meeting");
    // ...and the override survives for the next standard instruction.
    let snap = h.registry.snapshot(TEST_PORT).unwrap();
    assert_eq!(
        snap.session.pending_status_override.as_deref(),
        Some("rework")
    );
}

#[tokio::test]
async fn indirect_does_not_touch_the_accepted_instruction() {
    let h = Harness::new();

    h.scan("ID:A01-0001").await;

    let snap = h.registry.snapshot(TEST_PORT).unwrap();
    assert!(snap.last_instruction.is_none());
}

#[tokio::test]
async fn pair_mode_indirect_opens_two_records() {
    let h = Harness::new();
    h.store.seed_indirect("A03", "equipment maintenance", "MAINT ");

    h.scan("WCD100").await;
    h.scan("WCD200").await;
    h.scan("ID:A03-0001").await;

    let open = h.store.open_records();
    assert_eq!(open.len(), 2);
    assert!(open.iter().all(|r| r.status == "equipment maintenance"));
    assert_eq!(open[0].start_time, open[1].start_time);
}
