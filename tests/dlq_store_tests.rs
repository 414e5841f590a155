//! DLQ store tests
//!
//! Row lifecycle: Pending → Processed on replay, retry_count bumps on
//! failure, terminal Failed at the ceiling, creation-order fetches.

use chingu_graph::dlq::{DlqStatus, DlqStore, FriendEventDlq};
use chingu_graph::mirror::MirrorOp;
use chingu_graph::uuid::Uuid;
use tempfile::TempDir;

fn setup_store() -> (DlqStore, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = DlqStore::new(temp_dir.path()).expect("Failed to open DLQ store");
    (store, temp_dir)
}

fn add_row(member_id: i64, friend_id: i64) -> FriendEventDlq {
    FriendEventDlq::from_op(
        Uuid::new_v4(),
        &MirrorOp::FriendAdd {
            member_id,
            friend_id,
        },
        "connection refused",
    )
}

#[test]
fn test_fetch_returns_creation_order() {
    let (store, _dir) = setup_store();

    let mut first = add_row(1, 2);
    first.created_at = chrono::Utc::now() - chrono::Duration::minutes(10);
    let mut second = add_row(3, 4);
    second.created_at = chrono::Utc::now() - chrono::Duration::minutes(5);
    let third = add_row(5, 6);

    // insert out of order; fetch must come back oldest first
    store.insert(&third).unwrap();
    store.insert(&first).unwrap();
    store.insert(&second).unwrap();

    let rows = store.fetch_pending(10).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].id, first.id);
    assert_eq!(rows[1].id, second.id);
    assert_eq!(rows[2].id, third.id);
}

#[test]
fn test_fetch_respects_limit() {
    let (store, _dir) = setup_store();
    for i in 0..10 {
        store.insert(&add_row(i, i + 100)).unwrap();
    }
    assert_eq!(store.fetch_pending(4).unwrap().len(), 4);
}

#[test]
fn test_processed_rows_excluded_from_fetch() {
    let (store, _dir) = setup_store();
    let row = add_row(1, 2);
    store.insert(&row).unwrap();

    store.mark_processed(&row).unwrap();

    assert!(store.fetch_pending(10).unwrap().is_empty());
    let stats = store.stats().unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.pending, 0);
}

#[test]
fn test_failure_increments_until_terminal() {
    let (store, _dir) = setup_store();
    let row = add_row(1, 2);
    store.insert(&row).unwrap();

    let after_one = store.record_failure(&row, "timeout", 3).unwrap();
    assert_eq!(after_one.retry_count, 1);
    assert_eq!(after_one.status, DlqStatus::Pending);

    let after_two = store.record_failure(&after_one, "timeout", 3).unwrap();
    assert_eq!(after_two.retry_count, 2);
    assert_eq!(after_two.status, DlqStatus::Pending);

    let after_three = store.record_failure(&after_two, "timeout", 3).unwrap();
    assert_eq!(after_three.retry_count, 3);
    assert_eq!(after_three.status, DlqStatus::Failed);

    // terminal rows are excluded from future scheduled fetches
    assert!(store.fetch_pending(10).unwrap().is_empty());
    assert_eq!(store.stats().unwrap().failed, 1);
}

#[test]
fn test_failure_keeps_last_error() {
    let (store, _dir) = setup_store();
    let row = add_row(1, 2);
    store.insert(&row).unwrap();

    let updated = store.record_failure(&row, "broken pipe", 3).unwrap();
    assert_eq!(updated.last_error.as_deref(), Some("broken pipe"));
}

#[test]
fn test_purge_removes_only_old_processed_rows() {
    let (store, _dir) = setup_store();

    let mut old_processed = add_row(1, 2);
    old_processed.created_at = chrono::Utc::now() - chrono::Duration::days(10);
    store.insert(&old_processed).unwrap();
    store.mark_processed(&old_processed).unwrap();

    let fresh_processed = add_row(3, 4);
    store.insert(&fresh_processed).unwrap();
    store.mark_processed(&fresh_processed).unwrap();

    let mut old_failed = add_row(5, 6);
    old_failed.created_at = chrono::Utc::now() - chrono::Duration::days(10);
    store.insert(&old_failed).unwrap();
    let mut terminal = old_failed.clone();
    for _ in 0..3 {
        terminal = store.record_failure(&terminal, "timeout", 3).unwrap();
    }

    let cutoff = chrono::Utc::now() - chrono::Duration::days(7);
    let purged = store.purge_processed_before(cutoff).unwrap();
    assert_eq!(purged, 1);

    let stats = store.stats().unwrap();
    assert_eq!(stats.processed, 1); // fresh one kept
    assert_eq!(stats.failed, 1); // Failed rows are never purged
}
