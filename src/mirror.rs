//! Redis friendship mirror
//!
//! Denormalized symmetric copy of the relational friendship table:
//! `friend:{memberId}` → set of friend ids. Updated asynchronously from
//! domain events with bounded retry; exhausted operations become DLQ rows
//! (see `events.rs` for the producer and `dlq/` for the drainer).
//!
//! The two symmetric writes of an operation are separate per-key commands;
//! no cross-key transaction wraps them. A crash in between leaves a
//! transient asymmetry that retry or DLQ replay repairs.

use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::constants::{FRIEND_KEY_PREFIX, MIRROR_BACKOFF_JITTER_MS};
use crate::errors::{EngineError, Result};
use crate::metrics::{MIRROR_APPLY_TOTAL, MIRROR_RETRY_TOTAL};

/// A single reconciliation task against the key-value store.
///
/// `FriendAdd` and `FriendRemove` are idempotent set operations and replay
/// safely; `ScoreUp` carries the event id for its set-once-and-check guard.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorOp {
    FriendAdd {
        member_id: i64,
        friend_id: i64,
    },
    FriendRemove {
        member_id: i64,
        friend_id: i64,
    },
    ScoreUp {
        member_id: i64,
        target_id: i64,
        amount: f64,
        event_id: Uuid,
    },
}

impl MirrorOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FriendAdd { .. } => "friend_add",
            Self::FriendRemove { .. } => "friend_remove",
            Self::ScoreUp { .. } => "score_up",
        }
    }
}

pub fn friend_key(member_id: i64) -> String {
    format!("{FRIEND_KEY_PREFIX}{member_id}")
}

/// Apply one operation against the mirror. Each symmetric half is its own
/// per-key atomic command.
pub async fn apply_op(conn: &mut ConnectionManager, op: &MirrorOp) -> Result<()> {
    match op {
        MirrorOp::FriendAdd {
            member_id,
            friend_id,
        } => {
            let _: () = conn.sadd(friend_key(*member_id), *friend_id).await?;
            let _: () = conn.sadd(friend_key(*friend_id), *member_id).await?;
        }
        MirrorOp::FriendRemove {
            member_id,
            friend_id,
        } => {
            let _: () = conn.srem(friend_key(*member_id), *friend_id).await?;
            let _: () = conn.srem(friend_key(*friend_id), *member_id).await?;
        }
        MirrorOp::ScoreUp {
            member_id,
            target_id,
            amount,
            event_id,
        } => {
            crate::interaction::apply_score_up(conn, *member_id, *target_id, *amount, *event_id)
                .await?;
        }
    }
    Ok(())
}

/// Retry policy for the synchronous listener path.
#[derive(Debug, Clone)]
pub struct MirrorPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for MirrorPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::constants::MIRROR_MAX_ATTEMPTS,
            backoff_base_ms: crate::constants::MIRROR_BACKOFF_BASE_MS,
        }
    }
}

/// Handle to the mirror with the listener-side retry policy attached.
///
/// The connection handle is passed in explicitly; components never reach
/// for an ambient singleton.
#[derive(Clone)]
pub struct FriendshipMirror {
    conn: ConnectionManager,
    policy: MirrorPolicy,
}

impl FriendshipMirror {
    pub fn new(conn: ConnectionManager, policy: MirrorPolicy) -> Self {
        Self { conn, policy }
    }

    /// Single attempt, no retry.
    pub async fn apply(&self, op: &MirrorOp) -> Result<()> {
        let mut conn = self.conn.clone();
        apply_op(&mut conn, op).await
    }

    /// Bounded retry with exponential backoff and jitter. Non-transient
    /// errors fail fast; exhaustion surfaces as `RetryExhausted` so the
    /// listener can produce a DLQ row.
    pub async fn apply_with_retry(&self, op: &MirrorOp) -> Result<()> {
        let mut backoff = Duration::from_millis(self.policy.backoff_base_ms);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.policy.max_attempts {
            match self.apply(op).await {
                Ok(()) => {
                    MIRROR_APPLY_TOTAL
                        .with_label_values(&[op.kind(), "ok"])
                        .inc();
                    if attempt > 1 {
                        tracing::info!(op = op.kind(), attempt, "mirror apply recovered");
                    }
                    return Ok(());
                }
                Err(e) if !e.is_transient() => {
                    MIRROR_APPLY_TOTAL
                        .with_label_values(&[op.kind(), "error"])
                        .inc();
                    return Err(e);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        op = op.kind(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %last_error,
                        "mirror apply failed"
                    );
                    if attempt < self.policy.max_attempts {
                        MIRROR_RETRY_TOTAL.inc();
                        let jitter = rand::thread_rng().gen_range(0..=MIRROR_BACKOFF_JITTER_MS);
                        sleep(backoff + Duration::from_millis(jitter)).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        MIRROR_APPLY_TOTAL
            .with_label_values(&[op.kind(), "error"])
            .inc();
        Err(EngineError::RetryExhausted {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }

    /// Mirrored friend set for a member.
    pub async fn friends_of(&self, member_id: i64) -> Result<Vec<i64>> {
        let mut conn = self.conn.clone();
        let mut friends: Vec<i64> = conn.smembers(friend_key(member_id)).await?;
        friends.sort_unstable();
        Ok(friends)
    }

    pub async fn contains(&self, member_id: i64, friend_id: i64) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(friend_key(member_id), friend_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_kinds() {
        let add = MirrorOp::FriendAdd {
            member_id: 1,
            friend_id: 2,
        };
        let score = MirrorOp::ScoreUp {
            member_id: 1,
            target_id: 2,
            amount: 0.5,
            event_id: Uuid::new_v4(),
        };
        assert_eq!(add.kind(), "friend_add");
        assert_eq!(score.kind(), "score_up");
    }

    #[test]
    fn test_friend_key_layout() {
        assert_eq!(friend_key(42), "friend:42");
    }
}
