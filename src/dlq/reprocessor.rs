//! Periodic replay of dead-lettered mirror mutations
//!
//! A generic replay-queue drainer over [`ReplayTarget`]. Each tick:
//! acquire the drain lock (skip the tick if another instance holds it),
//! health-check the backing store (skip the whole batch if unhealthy -
//! backpressure instead of wasted retries), fetch up to a batch of
//! `Pending` rows oldest-first, apply them in pipelined round trips, and
//! on a pipeline-level error fall back to per-row application so one bad
//! row cannot block the batch.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{
    DLQ_BATCH_SIZE, DLQ_MAX_RETRY, DLQ_PROCESSED_RETENTION_DAYS, DRAIN_LOCK_KEY,
    DRAIN_LOCK_TTL_SECS, IDEMPOTENCY_TTL_SECS, INTERACTION_SCORE_CAP,
};
use crate::dlq::store::{DlqStatus, DlqStore, FriendEventDlq};
use crate::errors::Result;
use crate::interaction::{idempotency_key, interaction_key};
use crate::metrics::{DLQ_PENDING, DLQ_REPLAYED_TOTAL, DRAIN_SKIPPED_TOTAL};
use crate::mirror::{friend_key, MirrorOp};

/// Backing store the drainer replays against. The Redis implementation is
/// production; tests drive a fake.
#[async_trait]
pub trait ReplayTarget: Send + Sync {
    /// Health check. An error here skips the whole batch.
    async fn ping(&self) -> Result<()>;

    /// Acquire the drain mutex with a TTL. `false` means another instance
    /// holds it and this tick should be skipped.
    async fn acquire_drain_lock(&self, ttl: Duration) -> Result<bool>;

    /// Release the drain mutex if this instance still holds it.
    async fn release_drain_lock(&self) -> Result<()>;

    /// Apply a whole batch in pipelined round trips; all-or-error.
    async fn apply_batch(&self, ops: &[MirrorOp]) -> Result<()>;

    /// Apply a single operation.
    async fn apply_one(&self, op: &MirrorOp) -> Result<()>;
}

/// Redis-backed replay target with a per-process lock token.
pub struct RedisReplayTarget {
    conn: ConnectionManager,
    lock_token: String,
}

impl RedisReplayTarget {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            lock_token: Uuid::new_v4().to_string(),
        }
    }
}

#[async_trait]
impl ReplayTarget for RedisReplayTarget {
    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn acquire_drain_lock(&self, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(DRAIN_LOCK_KEY)
            .arg(&self.lock_token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn release_drain_lock(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        // Get-compare-delete; the TTL bounds the damage of the race.
        let holder: Option<String> = conn.get(DRAIN_LOCK_KEY).await?;
        if holder.as_deref() == Some(self.lock_token.as_str()) {
            let _: () = conn.del(DRAIN_LOCK_KEY).await?;
        }
        Ok(())
    }

    /// Pipelined batch apply.
    ///
    /// ScoreUp guard semantics survive batching: one pipeline claims the
    /// idempotency keys, one pipeline issues every set op and the fresh
    /// increments, and a final pass clamps any score that overshot the cap.
    async fn apply_batch(&self, ops: &[MirrorOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();

        // Claim idempotency guards for every ScoreUp in one round trip.
        let score_ups: Vec<&MirrorOp> = ops
            .iter()
            .filter(|op| matches!(op, MirrorOp::ScoreUp { .. }))
            .collect();
        let mut fresh = vec![true; score_ups.len()];
        if !score_ups.is_empty() {
            let mut pipe = redis::pipe();
            for op in &score_ups {
                if let MirrorOp::ScoreUp { event_id, .. } = op {
                    pipe.cmd("SET")
                        .arg(idempotency_key(*event_id))
                        .arg(1)
                        .arg("NX")
                        .arg("EX")
                        .arg(IDEMPOTENCY_TTL_SECS);
                }
            }
            let claims: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
            for (i, claim) in claims.iter().enumerate() {
                fresh[i] = claim.is_some();
            }
        }

        // Set ops plus fresh increments, one round trip. ZINCRBY results
        // come back in command order for the clamp pass.
        let mut pipe = redis::pipe();
        let mut incremented: Vec<(String, i64)> = Vec::new();
        let mut score_idx = 0;
        for op in ops {
            match op {
                MirrorOp::FriendAdd {
                    member_id,
                    friend_id,
                } => {
                    pipe.sadd(friend_key(*member_id), *friend_id).ignore();
                    pipe.sadd(friend_key(*friend_id), *member_id).ignore();
                }
                MirrorOp::FriendRemove {
                    member_id,
                    friend_id,
                } => {
                    pipe.srem(friend_key(*member_id), *friend_id).ignore();
                    pipe.srem(friend_key(*friend_id), *member_id).ignore();
                }
                MirrorOp::ScoreUp {
                    member_id,
                    target_id,
                    amount,
                    ..
                } => {
                    if fresh[score_idx] {
                        let forward = interaction_key(*member_id);
                        let backward = interaction_key(*target_id);
                        pipe.zincr(&forward, *target_id, *amount);
                        pipe.zincr(&backward, *member_id, *amount);
                        incremented.push((forward, *target_id));
                        incremented.push((backward, *member_id));
                    }
                    score_idx += 1;
                }
            }
        }
        let new_scores: Vec<f64> = pipe.query_async(&mut conn).await?;

        // Clamp overshoots.
        let mut clamp = redis::pipe();
        let mut needs_clamp = false;
        for ((key, other), score) in incremented.iter().zip(new_scores) {
            if score > INTERACTION_SCORE_CAP {
                clamp.zadd(key, *other, INTERACTION_SCORE_CAP).ignore();
                needs_clamp = true;
            }
        }
        if needs_clamp {
            let _: () = clamp.query_async(&mut conn).await?;
        }

        Ok(())
    }

    async fn apply_one(&self, op: &MirrorOp) -> Result<()> {
        let mut conn = self.conn.clone();
        crate::mirror::apply_op(&mut conn, op).await
    }
}

/// Drainer tuning; defaults come from `constants.rs`.
#[derive(Debug, Clone)]
pub struct ReprocessorConfig {
    pub batch_size: usize,
    pub max_retry: u32,
    pub lock_ttl: Duration,
    pub processed_retention_days: i64,
}

impl Default for ReprocessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DLQ_BATCH_SIZE,
            max_retry: DLQ_MAX_RETRY,
            lock_ttl: Duration::from_secs(DRAIN_LOCK_TTL_SECS),
            processed_retention_days: DLQ_PROCESSED_RETENTION_DAYS,
        }
    }
}

/// Outcome of one drain cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub fetched: usize,
    pub processed: usize,
    pub retried: usize,
    pub failed_terminal: usize,
    pub purged: usize,
    /// `Some("lock" | "unhealthy")` when the cycle did nothing.
    pub skipped: Option<&'static str>,
}

/// Periodic batch-then-per-item replayer of DLQ rows.
pub struct DlqReprocessor<T: ReplayTarget> {
    store: Arc<DlqStore>,
    target: T,
    config: ReprocessorConfig,
}

impl<T: ReplayTarget> DlqReprocessor<T> {
    pub fn new(store: Arc<DlqStore>, target: T, config: ReprocessorConfig) -> Self {
        Self {
            store,
            target,
            config,
        }
    }

    /// One drain cycle. Never leaves the lock held.
    pub async fn drain_once(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        if !self.target.acquire_drain_lock(self.config.lock_ttl).await? {
            DRAIN_SKIPPED_TOTAL.with_label_values(&["lock"]).inc();
            debug!("drain lock contended, skipping cycle");
            report.skipped = Some("lock");
            return Ok(report);
        }

        let drained = self.drain_locked(&mut report).await;
        if let Err(e) = self.target.release_drain_lock().await {
            warn!(error = %e, "failed to release drain lock; TTL will expire it");
        }
        drained.map(|()| report)
    }

    async fn drain_locked(&self, report: &mut DrainReport) -> Result<()> {
        if let Err(e) = self.target.ping().await {
            // Backpressure: leave every row untouched until the store is back.
            DRAIN_SKIPPED_TOTAL.with_label_values(&["unhealthy"]).inc();
            warn!(error = %e, "mirror unhealthy, skipping drain cycle");
            report.skipped = Some("unhealthy");
            return Ok(());
        }

        let rows = self.store.fetch_pending(self.config.batch_size)?;
        DLQ_PENDING.set(rows.len() as i64);
        report.fetched = rows.len();

        if !rows.is_empty() {
            self.replay(rows, report).await?;
        }

        let cutoff = Utc::now() - ChronoDuration::days(self.config.processed_retention_days);
        report.purged = self.store.purge_processed_before(cutoff)?;

        Ok(())
    }

    async fn replay(&self, rows: Vec<FriendEventDlq>, report: &mut DrainReport) -> Result<()> {
        // Rows that cannot be turned back into an operation (corrupt
        // payload) burn a retry instead of poisoning the batch.
        let mut batch: Vec<(FriendEventDlq, MirrorOp)> = Vec::with_capacity(rows.len());
        for row in rows {
            match row.to_op() {
                Ok(op) => batch.push((row, op)),
                Err(e) => {
                    let updated = self.store.record_failure(&row, &e.to_string(), self.config.max_retry)?;
                    self.count_failure(&updated, report);
                }
            }
        }

        let ops: Vec<MirrorOp> = batch.iter().map(|(_, op)| op.clone()).collect();
        match self.target.apply_batch(&ops).await {
            Ok(()) => {
                for (row, _) in &batch {
                    self.store.mark_processed(row)?;
                    DLQ_REPLAYED_TOTAL.with_label_values(&["processed"]).inc();
                }
                report.processed += batch.len();
            }
            Err(e) => {
                warn!(error = %e, rows = batch.len(), "batch replay failed, falling back to per-row");
                for (row, op) in &batch {
                    match self.target.apply_one(op).await {
                        Ok(()) => {
                            self.store.mark_processed(row)?;
                            DLQ_REPLAYED_TOTAL.with_label_values(&["processed"]).inc();
                            report.processed += 1;
                        }
                        Err(e) => {
                            let updated =
                                self.store
                                    .record_failure(row, &e.to_string(), self.config.max_retry)?;
                            self.count_failure(&updated, report);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn count_failure(&self, row: &FriendEventDlq, report: &mut DrainReport) {
        if row.status == DlqStatus::Failed {
            DLQ_REPLAYED_TOTAL.with_label_values(&["failed"]).inc();
            warn!(
                id = %row.id,
                event_type = row.event_type.as_str(),
                retry_count = row.retry_count,
                "DLQ row terminally failed"
            );
            report.failed_terminal += 1;
        } else {
            DLQ_REPLAYED_TOTAL.with_label_values(&["retried"]).inc();
            report.retried += 1;
        }
    }

    /// Fixed-interval drain loop until shutdown.
    pub async fn run(self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;

        info!(every_secs = interval_secs, "DLQ reprocessor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.drain_once().await {
                        Ok(report) if report.fetched > 0 || report.purged > 0 => {
                            info!(
                                fetched = report.fetched,
                                processed = report.processed,
                                retried = report.retried,
                                failed = report.failed_terminal,
                                purged = report.purged,
                                "drain cycle complete"
                            );
                        }
                        Ok(_) => debug!("drain cycle complete (idle)"),
                        Err(e) => warn!(error = %e, "drain cycle failed"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("DLQ reprocessor stopped");
    }
}
