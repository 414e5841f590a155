//! Decaying interaction score store
//!
//! One zset per member, `interaction:{memberId}` → otherId → score.
//! Scores are symmetric, additive in steps of 0.5, capped at 9.5 per
//! direction, and multiplied by 0.95 every night; entries falling below
//! 0.1 are deleted. Increments are commutative, so concurrent application
//! needs no locking; the decay sweep is best-effort with no isolation
//! against concurrent increments.
//!
//! Anonymous-author and self-interaction guards run in the event listener
//! (`events.rs`), not here.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{
    IDEMPOTENCY_KEY_PREFIX, IDEMPOTENCY_TTL_SECS, INTERACTION_KEY_PREFIX,
    INTERACTION_PRUNE_THRESHOLD, INTERACTION_SCORE_CAP,
};
use crate::errors::Result;
use crate::metrics::{DECAY_PRUNED_TOTAL, DECAY_RUNS_TOTAL};

pub fn interaction_key(member_id: i64) -> String {
    format!("{INTERACTION_KEY_PREFIX}{member_id}")
}

pub fn idempotency_key(event_id: Uuid) -> String {
    format!("{IDEMPOTENCY_KEY_PREFIX}{event_id}")
}

/// Decay a single direction's score. Never negative.
pub fn decayed_score(score: f64, factor: f64) -> f64 {
    (score * factor).max(0.0)
}

/// Clamp a direction's score to the cap.
pub fn clamped_score(score: f64) -> f64 {
    score.min(INTERACTION_SCORE_CAP)
}

/// Apply one ScoreUp: claim the per-event idempotency key, then increment
/// both directions with the cap.
///
/// The claim happens before the increments, so a failure in between
/// under-counts one event rather than double-counting on replay; the guard
/// key is released best-effort on failure so a later replay can re-claim.
pub(crate) async fn apply_score_up(
    conn: &mut ConnectionManager,
    member_id: i64,
    target_id: i64,
    amount: f64,
    event_id: Uuid,
) -> Result<()> {
    let guard = idempotency_key(event_id);
    let claimed: Option<String> = redis::cmd("SET")
        .arg(&guard)
        .arg(1)
        .arg("NX")
        .arg("EX")
        .arg(IDEMPOTENCY_TTL_SECS)
        .query_async(conn)
        .await?;

    if claimed.is_none() {
        debug!(%event_id, "score-up already applied, skipping");
        return Ok(());
    }

    match incr_both(conn, member_id, target_id, amount).await {
        Ok(()) => Ok(()),
        Err(e) => {
            // Release the claim so replay can retry the whole event.
            if let Err(del_err) = conn.del::<_, ()>(&guard).await {
                warn!(%event_id, error = %del_err, "failed to release idempotency guard");
            }
            Err(e)
        }
    }
}

async fn incr_both(
    conn: &mut ConnectionManager,
    member_id: i64,
    target_id: i64,
    amount: f64,
) -> Result<()> {
    incr_clamped(conn, member_id, target_id, amount).await?;
    incr_clamped(conn, target_id, member_id, amount).await?;
    Ok(())
}

async fn incr_clamped(
    conn: &mut ConnectionManager,
    owner: i64,
    other: i64,
    amount: f64,
) -> Result<()> {
    let key = interaction_key(owner);
    let new_score: f64 = conn.zincr(&key, other, amount).await?;
    if new_score > INTERACTION_SCORE_CAP {
        let _: () = conn.zadd(&key, other, INTERACTION_SCORE_CAP).await?;
    }
    Ok(())
}

/// Outcome of one decay sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecaySummary {
    pub keys_scanned: usize,
    pub entries_updated: usize,
    pub entries_pruned: usize,
}

/// Handle to the interaction score zsets.
#[derive(Clone)]
pub struct InteractionScoreStore {
    conn: ConnectionManager,
    decay_factor: f64,
}

impl InteractionScoreStore {
    pub fn new(conn: ConnectionManager, decay_factor: f64) -> Self {
        Self { conn, decay_factor }
    }

    /// Symmetric capped increment for a qualifying interaction.
    pub async fn add_score(
        &self,
        member_id: i64,
        target_id: i64,
        amount: f64,
        event_id: Uuid,
    ) -> Result<()> {
        let mut conn = self.conn.clone();
        apply_score_up(&mut conn, member_id, target_id, amount, event_id).await
    }

    /// Score of (member → other), if any.
    pub async fn score_of(&self, member_id: i64, other_id: i64) -> Result<Option<f64>> {
        let mut conn = self.conn.clone();
        Ok(conn.zscore(interaction_key(member_id), other_id).await?)
    }

    /// Scores of (member → each other) in one pipelined round trip.
    /// Pairs with no score are absent from the map.
    pub async fn scores_for(
        &self,
        member_id: i64,
        others: &[i64],
    ) -> Result<std::collections::HashMap<i64, f64>> {
        if others.is_empty() {
            return Ok(std::collections::HashMap::new());
        }
        let mut conn = self.conn.clone();
        let key = interaction_key(member_id);

        let mut pipe = redis::pipe();
        for other in others {
            pipe.zscore(&key, *other);
        }
        let scores: Vec<Option<f64>> = pipe.query_async(&mut conn).await?;

        Ok(others
            .iter()
            .zip(scores)
            .filter_map(|(id, score)| score.map(|s| (*id, s)))
            .collect())
    }

    /// One full decay sweep over every `interaction:*` key.
    ///
    /// Per-key failures are logged and skipped; the sweep keeps going.
    /// A missed sweep leaves scores stale until the next run - not data loss.
    pub async fn apply_decay(&self) -> Result<DecaySummary> {
        let mut scan_conn = self.conn.clone();
        let mut summary = DecaySummary::default();
        let pattern = format!("{INTERACTION_KEY_PREFIX}*");
        let mut cursor: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut scan_conn)
                .await?;

            for key in keys {
                summary.keys_scanned += 1;
                match self.decay_key(&key).await {
                    Ok((updated, pruned)) => {
                        summary.entries_updated += updated;
                        summary.entries_pruned += pruned;
                    }
                    Err(e) => {
                        warn!(key, error = %e, "decay failed for key (continuing)");
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        DECAY_PRUNED_TOTAL.inc_by(summary.entries_pruned as u64);
        Ok(summary)
    }

    async fn decay_key(&self, key: &str) -> Result<(usize, usize)> {
        let mut conn = self.conn.clone();
        let entries: Vec<(i64, f64)> = conn.zrange_withscores(key, 0, -1).await?;
        if entries.is_empty() {
            return Ok((0, 0));
        }

        let mut pipe = redis::pipe();
        let mut updated = 0;
        let mut pruned = 0;
        for (other, score) in entries {
            let next = decayed_score(score, self.decay_factor);
            if next < INTERACTION_PRUNE_THRESHOLD {
                pipe.zrem(key, other).ignore();
                pruned += 1;
            } else {
                pipe.zadd(key, other, next).ignore();
                updated += 1;
            }
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok((updated, pruned))
    }
}

/// Seconds until the next occurrence of `hour_utc:00:00`.
fn secs_until_next(hour_utc: u32, now: chrono::DateTime<chrono::Utc>) -> u64 {
    let today = now
        .date_naive()
        .and_hms_opt(hour_utc, 0, 0)
        .expect("hour clamped to 0..=23");
    let target = if today > now.naive_utc() {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (target - now.naive_utc()).num_seconds().max(1) as u64
}

/// Nightly decay scheduler. Failures are swallowed and logged; the loop
/// always reschedules for the next night.
pub async fn run_nightly_decay(
    store: InteractionScoreStore,
    hour_utc: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let wait = secs_until_next(hour_utc, chrono::Utc::now());
        info!(
            in_secs = wait,
            at_hour_utc = hour_utc,
            "next interaction score decay scheduled"
        );

        tokio::select! {
            _ = sleep(Duration::from_secs(wait)) => {
                match store.apply_decay().await {
                    Ok(summary) => {
                        DECAY_RUNS_TOTAL.with_label_values(&["ok"]).inc();
                        info!(
                            keys = summary.keys_scanned,
                            updated = summary.entries_updated,
                            pruned = summary.entries_pruned,
                            "interaction score decay pass complete"
                        );
                    }
                    Err(e) => {
                        DECAY_RUNS_TOTAL.with_label_values(&["error"]).inc();
                        warn!(error = %e, "decay pass failed; scores stay stale until next run");
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_additive_cap_property() {
        // After N qualifying increments without decay: min(9.5, 0.5 * N)
        let step = crate::constants::INTERACTION_SCORE_STEP;
        let mut score = 0.0_f64;
        for n in 1..=25 {
            score = clamped_score(score + step);
            let expected = (step * n as f64).min(INTERACTION_SCORE_CAP);
            assert!((score - expected).abs() < 1e-9, "n={n}");
        }
        assert!((score - INTERACTION_SCORE_CAP).abs() < 1e-9);
    }

    #[test]
    fn test_decay_math() {
        let factor = crate::constants::INTERACTION_DECAY_FACTOR;
        assert!((decayed_score(1.0, factor) - 0.95).abs() < 1e-9);
        assert!((decayed_score(9.5, factor) - 9.025).abs() < 1e-9);
        assert_eq!(decayed_score(0.0, factor), 0.0);
    }

    #[test]
    fn test_decay_never_negative() {
        assert!(decayed_score(-1.0, 0.95) >= 0.0);
    }

    #[test]
    fn test_prune_threshold_reached_by_decay() {
        // A minimum-step score decays under the prune threshold eventually
        let factor = crate::constants::INTERACTION_DECAY_FACTOR;
        let mut score = crate::constants::INTERACTION_SCORE_STEP;
        let mut nights = 0;
        while score >= INTERACTION_PRUNE_THRESHOLD {
            score = decayed_score(score, factor);
            nights += 1;
            assert!(nights < 100, "decay must reach the prune threshold");
        }
        assert!(score < INTERACTION_PRUNE_THRESHOLD);
    }

    #[test]
    fn test_secs_until_next_rolls_over_midnight() {
        let now = chrono::DateTime::parse_from_rfc3339("2025-06-01T04:30:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        // 03:00 already passed today -> tomorrow 03:00, 22.5h away
        let wait = secs_until_next(3, now);
        assert_eq!(wait, 22 * 3600 + 1800);
        assert!(wait < 24 * 3600);
    }

    #[test]
    fn test_secs_until_next_same_day() {
        let now = chrono::DateTime::parse_from_rfc3339("2025-06-01T01:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(secs_until_next(3, now), 2 * 3600);
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(interaction_key(7), "interaction:7");
        let id = Uuid::nil();
        assert_eq!(
            idempotency_key(id),
            format!("applied:{id}")
        );
    }
}
