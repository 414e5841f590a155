//! Documented constants for the recommendation engine
//!
//! All tunable parameters in one place. Centralizing constants prevents
//! magic numbers scattered through the score and replay paths.

// =============================================================================
// INTERACTION SCORE CONSTANTS
// =============================================================================

/// Score added per qualifying interaction (post like, comment, comment like).
///
/// Applied symmetrically: both (a→b) and (b→a) receive the increment.
pub const INTERACTION_SCORE_STEP: f64 = 0.5;

/// Upper bound for a single direction's interaction score.
///
/// 19 increments saturate the pair; further activity no longer changes
/// the ranking contribution.
pub const INTERACTION_SCORE_CAP: f64 = 9.5;

/// Multiplicative decay applied to every stored score each nightly pass.
pub const INTERACTION_DECAY_FACTOR: f64 = 0.95;

/// Scores below this value after decay are deleted outright.
///
/// Keeps the zsets from accumulating near-zero tails of stale pairs.
pub const INTERACTION_PRUNE_THRESHOLD: f64 = 0.1;

// =============================================================================
// DEGREE CALCULATOR CONSTANTS
// =============================================================================

/// Base priority score assigned when a candidate is first discovered at
/// degree 2 (friend-of-friend). Accumulates per additional discovery path.
pub const SECOND_DEGREE_BASE_SCORE: f64 = 50.0;

/// Base priority score for degree-3 (extended network) candidates.
pub const THIRD_DEGREE_BASE_SCORE: f64 = 20.0;

// =============================================================================
// MIRROR RETRY CONSTANTS
// =============================================================================

/// Attempts per mirror operation on the listener path before the event is
/// handed to the DLQ.
pub const MIRROR_MAX_ATTEMPTS: u32 = 3;

/// Initial backoff between mirror retry attempts (doubled per attempt).
pub const MIRROR_BACKOFF_BASE_MS: u64 = 200;

/// Random jitter added to each backoff sleep, in milliseconds.
pub const MIRROR_BACKOFF_JITTER_MS: u64 = 50;

// =============================================================================
// DLQ REPLAY CONSTANTS
// =============================================================================

/// Replay attempts before a DLQ row becomes terminally `Failed`.
pub const DLQ_MAX_RETRY: u32 = 3;

/// Maximum rows fetched per drain cycle, oldest first.
pub const DLQ_BATCH_SIZE: usize = 100;

/// Lock TTL for the drain mutex. Must stay below the drain interval so a
/// crashed holder cannot block more than one cycle.
pub const DRAIN_LOCK_TTL_SECS: u64 = 240;

/// `Processed` rows older than this are purged during drain.
/// `Failed` rows are kept for inspection.
pub const DLQ_PROCESSED_RETENTION_DAYS: i64 = 7;

// =============================================================================
// KEY LAYOUT
// =============================================================================

/// `friend:{memberId}` → set of friend ids. No expiry.
pub const FRIEND_KEY_PREFIX: &str = "friend:";

/// `interaction:{memberId}` → zset of otherId → score. No expiry; managed
/// purely by the nightly decay pass.
pub const INTERACTION_KEY_PREFIX: &str = "interaction:";

/// `applied:{eventId}` → set-once idempotency guard for ScoreUp replay.
pub const IDEMPOTENCY_KEY_PREFIX: &str = "applied:";

/// TTL on idempotency guard keys. Must outlive the longest plausible
/// replay window (retry ceiling × drain interval, with slack).
pub const IDEMPOTENCY_TTL_SECS: u64 = 7 * 24 * 3600;

/// Drain mutex key.
pub const DRAIN_LOCK_KEY: &str = "chingu:drain:lock";
