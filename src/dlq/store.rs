//! Durable dead-letter rows for failed mirror mutations
//!
//! Rows are keyed by creation time so the drain scheduler replays oldest
//! first. Status transitions: `Pending` → `Processed` on successful replay,
//! `Pending` → `Pending` with `retry_count + 1` on a transient per-row
//! failure, `Pending` → `Failed` once `retry_count` reaches the ceiling.
//! `Failed` is terminal.

use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::{EngineError, Result};
use crate::mirror::MirrorOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DlqEventType {
    FriendAdd,
    FriendRemove,
    ScoreUp,
}

impl DlqEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FriendAdd => "FRIEND_ADD",
            Self::FriendRemove => "FRIEND_REMOVE",
            Self::ScoreUp => "SCORE_UP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DlqStatus {
    Pending,
    Processed,
    Failed,
}

/// One failed mirror mutation awaiting replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FriendEventDlq {
    /// Original event id; doubles as the idempotency key for ScoreUp replay.
    pub id: Uuid,
    pub event_type: DlqEventType,
    pub member_id: i64,
    pub target_id: i64,
    pub score: Option<f64>,
    pub retry_count: u32,
    pub status: DlqStatus,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl FriendEventDlq {
    /// Build a row from the operation that exhausted its retries.
    pub fn from_op(event_id: Uuid, op: &MirrorOp, error: &str) -> Self {
        let (event_type, member_id, target_id, score) = match op {
            MirrorOp::FriendAdd {
                member_id,
                friend_id,
            } => (DlqEventType::FriendAdd, *member_id, *friend_id, None),
            MirrorOp::FriendRemove {
                member_id,
                friend_id,
            } => (DlqEventType::FriendRemove, *member_id, *friend_id, None),
            MirrorOp::ScoreUp {
                member_id,
                target_id,
                amount,
                ..
            } => (DlqEventType::ScoreUp, *member_id, *target_id, Some(*amount)),
        };

        Self {
            id: event_id,
            event_type,
            member_id,
            target_id,
            score,
            retry_count: 0,
            status: DlqStatus::Pending,
            created_at: Utc::now(),
            last_error: Some(error.to_string()),
        }
    }

    /// Reconstruct the mirror operation this row stands for.
    pub fn to_op(&self) -> Result<MirrorOp> {
        match self.event_type {
            DlqEventType::FriendAdd => Ok(MirrorOp::FriendAdd {
                member_id: self.member_id,
                friend_id: self.target_id,
            }),
            DlqEventType::FriendRemove => Ok(MirrorOp::FriendRemove {
                member_id: self.member_id,
                friend_id: self.target_id,
            }),
            DlqEventType::ScoreUp => {
                let amount = self.score.ok_or_else(|| EngineError::InvalidEvent {
                    reason: format!("SCORE_UP row {} has no score", self.id),
                })?;
                Ok(MirrorOp::ScoreUp {
                    member_id: self.member_id,
                    target_id: self.target_id,
                    amount,
                    event_id: self.id,
                })
            }
        }
    }
}

/// Aggregate row counts, surfaced in logs and the pending gauge.
#[derive(Debug, Default, Clone, Copy)]
pub struct DlqStats {
    pub pending: usize,
    pub processed: usize,
    pub failed: usize,
}

/// RocksDB-backed dead-letter queue.
///
/// Key layout: `q:{created_at_millis:020}:{id}` → bincode row, so a forward
/// scan yields creation order.
pub struct DlqStore {
    db: Arc<DB>,
}

fn row_key(row: &FriendEventDlq) -> Vec<u8> {
    format!("q:{:020}:{}", row.created_at.timestamp_millis(), row.id).into_bytes()
}

const QUEUE_PREFIX: &[u8] = b"q:";

impl DlqStore {
    pub fn new(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let db = DB::open(&opts, path)?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn insert(&self, row: &FriendEventDlq) -> Result<()> {
        self.db.put(row_key(row), bincode::serialize(row)?)?;
        Ok(())
    }

    /// Up to `limit` `Pending` rows, oldest first.
    pub fn fetch_pending(&self, limit: usize) -> Result<Vec<FriendEventDlq>> {
        let mut rows = Vec::new();
        for row in self.scan()? {
            if row.status == DlqStatus::Pending {
                rows.push(row);
                if rows.len() >= limit {
                    break;
                }
            }
        }
        Ok(rows)
    }

    /// Successful replay: `Pending` → `Processed`.
    pub fn mark_processed(&self, row: &FriendEventDlq) -> Result<()> {
        let mut updated = row.clone();
        updated.status = DlqStatus::Processed;
        updated.last_error = None;
        self.db.put(row_key(&updated), bincode::serialize(&updated)?)?;
        Ok(())
    }

    /// Failed replay: bump `retry_count`; terminal `Failed` at the ceiling.
    pub fn record_failure(
        &self,
        row: &FriendEventDlq,
        error: &str,
        max_retry: u32,
    ) -> Result<FriendEventDlq> {
        let mut updated = row.clone();
        updated.retry_count = updated.retry_count.saturating_add(1);
        updated.last_error = Some(error.to_string());
        if updated.retry_count >= max_retry {
            updated.status = DlqStatus::Failed;
        }
        self.db.put(row_key(&updated), bincode::serialize(&updated)?)?;
        Ok(updated)
    }

    /// Delete `Processed` rows created before `cutoff`. `Failed` rows are
    /// kept for inspection.
    pub fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut purged = 0;
        for row in self.scan()? {
            if row.status == DlqStatus::Processed && row.created_at < cutoff {
                self.db.delete(row_key(&row))?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    pub fn stats(&self) -> Result<DlqStats> {
        let mut stats = DlqStats::default();
        for row in self.scan()? {
            match row.status {
                DlqStatus::Pending => stats.pending += 1,
                DlqStatus::Processed => stats.processed += 1,
                DlqStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    fn scan(&self) -> Result<Vec<FriendEventDlq>> {
        let iter = self
            .db
            .iterator(IteratorMode::From(QUEUE_PREFIX, Direction::Forward));

        let mut rows = Vec::new();
        for entry in iter {
            let (key, value) = match entry {
                Ok(kv) => kv,
                Err(e) => {
                    tracing::warn!("RocksDB iterator error (continuing): {}", e);
                    continue;
                }
            };
            if !key.starts_with(QUEUE_PREFIX) {
                break;
            }
            match bincode::deserialize::<FriendEventDlq>(&value) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping corrupt DLQ row");
                }
            }
        }
        Ok(rows)
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| EngineError::Storage(e.to_string()))
    }
}
