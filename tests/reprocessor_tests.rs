//! DLQ reprocessor tests
//!
//! Drives the drain state machine against a fake replay target:
//! batch-then-per-item fallback, health-check backpressure, drain-lock
//! contention, and the terminal retry ceiling.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chingu_graph::dlq::{
    DlqReprocessor, DlqStatus, DlqStore, FriendEventDlq, ReplayTarget, ReprocessorConfig,
};
use chingu_graph::errors::{EngineError, Result};
use chingu_graph::mirror::MirrorOp;
use chingu_graph::uuid::Uuid;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::time::Duration;

#[derive(Default)]
struct FakeState {
    healthy: bool,
    lock_available: bool,
    fail_batch: bool,
    /// (member_id, other_id) pairs whose application fails.
    fail_pairs: HashSet<(i64, i64)>,
    applied: Vec<MirrorOp>,
    pings: usize,
}

#[derive(Clone)]
struct FakeTarget {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTarget {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                healthy: true,
                lock_available: true,
                ..FakeState::default()
            })),
        }
    }

    fn applied(&self) -> Vec<MirrorOp> {
        self.state.lock().applied.clone()
    }
}

fn op_pair(op: &MirrorOp) -> (i64, i64) {
    match op {
        MirrorOp::FriendAdd {
            member_id,
            friend_id,
        }
        | MirrorOp::FriendRemove {
            member_id,
            friend_id,
        } => (*member_id, *friend_id),
        MirrorOp::ScoreUp {
            member_id,
            target_id,
            ..
        } => (*member_id, *target_id),
    }
}

#[async_trait]
impl ReplayTarget for FakeTarget {
    async fn ping(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.pings += 1;
        if state.healthy {
            Ok(())
        } else {
            Err(EngineError::MirrorUnavailable("ping failed".to_string()))
        }
    }

    async fn acquire_drain_lock(&self, _ttl: Duration) -> Result<bool> {
        Ok(self.state.lock().lock_available)
    }

    async fn release_drain_lock(&self) -> Result<()> {
        Ok(())
    }

    async fn apply_batch(&self, ops: &[MirrorOp]) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_batch || ops.iter().any(|op| state.fail_pairs.contains(&op_pair(op))) {
            return Err(EngineError::MirrorUnavailable("pipeline broke".to_string()));
        }
        state.applied.extend(ops.iter().cloned());
        Ok(())
    }

    async fn apply_one(&self, op: &MirrorOp) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_pairs.contains(&op_pair(op)) {
            return Err(EngineError::MirrorUnavailable("write refused".to_string()));
        }
        state.applied.push(op.clone());
        Ok(())
    }
}

fn setup() -> (Arc<DlqStore>, FakeTarget, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(DlqStore::new(temp_dir.path()).expect("Failed to open DLQ store"));
    (store, FakeTarget::new(), temp_dir)
}

fn reprocessor(store: Arc<DlqStore>, target: FakeTarget) -> DlqReprocessor<FakeTarget> {
    DlqReprocessor::new(store, target, ReprocessorConfig::default())
}

fn enqueue_add(store: &DlqStore, member_id: i64, friend_id: i64) -> FriendEventDlq {
    let row = FriendEventDlq::from_op(
        Uuid::new_v4(),
        &MirrorOp::FriendAdd {
            member_id,
            friend_id,
        },
        "listener retries exhausted",
    );
    store.insert(&row).unwrap();
    row
}

#[tokio::test]
async fn test_healthy_batch_replays_everything() {
    let (store, target, _dir) = setup();
    enqueue_add(&store, 1, 2);
    enqueue_add(&store, 3, 4);

    let report = reprocessor(store.clone(), target.clone())
        .drain_once()
        .await
        .unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, None);
    assert_eq!(target.applied().len(), 2);
    assert!(store.fetch_pending(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_successful_rows_never_retry() {
    let (store, target, _dir) = setup();
    enqueue_add(&store, 1, 2);

    let engine = reprocessor(store.clone(), target.clone());
    engine.drain_once().await.unwrap();
    let second = engine.drain_once().await.unwrap();

    assert_eq!(second.fetched, 0);
    assert_eq!(target.applied().len(), 1);
}

#[tokio::test]
async fn test_unhealthy_store_skips_batch_with_zero_writes() {
    let (store, target, _dir) = setup();
    let row = enqueue_add(&store, 1, 2);
    target.state.lock().healthy = false;

    let report = reprocessor(store.clone(), target.clone())
        .drain_once()
        .await
        .unwrap();

    assert_eq!(report.skipped, Some("unhealthy"));
    assert_eq!(report.fetched, 0);
    assert!(target.applied().is_empty());

    // rows remain Pending with unchanged retry counts
    let pending = store.fetch_pending(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, row.id);
    assert_eq!(pending[0].retry_count, 0);
}

#[tokio::test]
async fn test_contended_lock_skips_cycle() {
    let (store, target, _dir) = setup();
    enqueue_add(&store, 1, 2);
    target.state.lock().lock_available = false;

    let report = reprocessor(store.clone(), target.clone())
        .drain_once()
        .await
        .unwrap();

    assert_eq!(report.skipped, Some("lock"));
    // skipped before the health check
    assert_eq!(target.state.lock().pings, 0);
    assert!(target.applied().is_empty());
}

#[tokio::test]
async fn test_batch_failure_falls_back_per_row() {
    let (store, target, _dir) = setup();
    enqueue_add(&store, 1, 2);
    let bad = enqueue_add(&store, 3, 4);
    enqueue_add(&store, 5, 6);
    target.state.lock().fail_pairs.insert((3, 4));

    let report = reprocessor(store.clone(), target.clone())
        .drain_once()
        .await
        .unwrap();

    // one bad row does not block the batch
    assert_eq!(report.processed, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(report.failed_terminal, 0);
    assert_eq!(target.applied().len(), 2);

    let pending = store.fetch_pending(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, bad.id);
    assert_eq!(pending[0].retry_count, 1);
}

#[tokio::test]
async fn test_row_turns_terminal_at_retry_ceiling() {
    let (store, target, _dir) = setup();
    enqueue_add(&store, 3, 4);
    target.state.lock().fail_pairs.insert((3, 4));

    let engine = reprocessor(store.clone(), target.clone());
    for expected_retry in 1..=2 {
        let report = engine.drain_once().await.unwrap();
        assert_eq!(report.retried, 1);
        let pending = store.fetch_pending(10).unwrap();
        assert_eq!(pending[0].retry_count, expected_retry);
        assert_eq!(pending[0].status, DlqStatus::Pending);
    }

    let report = engine.drain_once().await.unwrap();
    assert_eq!(report.failed_terminal, 1);
    assert_eq!(report.retried, 0);

    // Failed is terminal: excluded from every later fetch
    let report = engine.drain_once().await.unwrap();
    assert_eq!(report.fetched, 0);
    assert!(target.applied().is_empty());
    assert_eq!(store.stats().unwrap().failed, 1);
}

#[tokio::test]
async fn test_recovered_store_drains_backlog() {
    let (store, target, _dir) = setup();
    enqueue_add(&store, 1, 2);
    enqueue_add(&store, 3, 4);
    target.state.lock().healthy = false;

    let engine = reprocessor(store.clone(), target.clone());
    engine.drain_once().await.unwrap();
    assert!(target.applied().is_empty());

    target.state.lock().healthy = true;
    let report = engine.drain_once().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(target.applied().len(), 2);
}

#[tokio::test]
async fn test_score_up_rows_replay_with_amount_and_event_id() {
    let (store, target, _dir) = setup();
    let event_id = Uuid::new_v4();
    let op = MirrorOp::ScoreUp {
        member_id: 1,
        target_id: 2,
        amount: 0.5,
        event_id,
    };
    store
        .insert(&FriendEventDlq::from_op(event_id, &op, "timeout"))
        .unwrap();

    reprocessor(store.clone(), target.clone())
        .drain_once()
        .await
        .unwrap();

    // the replayed op keeps the original event id for the idempotency guard
    assert_eq!(target.applied(), vec![op]);
}
