//! Operational metrics with Prometheus
//!
//! Exposes the mirror/replay/decay counters the on-call actually looks at:
//! terminal DLQ failures are visible here, not only in the logs.
//!
//! NOTE: member ids are intentionally never used as metric labels to
//! prevent high-cardinality explosion.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    // ============================================================================
    // Mirror Metrics
    // ============================================================================

    /// Mirror operations by kind and result
    pub static ref MIRROR_APPLY_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chingu_mirror_apply_total", "Mirror operations applied"),
        &["op", "result"]  // op: "friend_add" | "friend_remove" | "score_up"
    ).unwrap();

    /// Retry attempts on the listener path
    pub static ref MIRROR_RETRY_TOTAL: IntCounter = IntCounter::new(
        "chingu_mirror_retry_total",
        "Mirror retry attempts after a transient failure"
    ).unwrap();

    // ============================================================================
    // DLQ Metrics
    // ============================================================================

    /// Rows enqueued by the listener after retry exhaustion
    pub static ref DLQ_ENQUEUED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chingu_dlq_enqueued_total", "DLQ rows produced"),
        &["type"]
    ).unwrap();

    /// Replay outcomes per drain cycle
    pub static ref DLQ_REPLAYED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chingu_dlq_replayed_total", "DLQ replay outcomes"),
        &["result"]  // result: "processed" | "retried" | "failed"
    ).unwrap();

    /// Pending rows observed at the last drain
    pub static ref DLQ_PENDING: IntGauge = IntGauge::new(
        "chingu_dlq_pending",
        "Pending DLQ rows at the last drain cycle"
    ).unwrap();

    /// Drain cycles skipped entirely
    pub static ref DRAIN_SKIPPED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chingu_drain_skipped_total", "Drain cycles skipped"),
        &["reason"]  // reason: "unhealthy" | "lock"
    ).unwrap();

    // ============================================================================
    // Decay Metrics
    // ============================================================================

    /// Decay pass outcomes
    pub static ref DECAY_RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chingu_decay_runs_total", "Interaction score decay passes"),
        &["result"]
    ).unwrap();

    /// Entries pruned by decay passes
    pub static ref DECAY_PRUNED_TOTAL: IntCounter = IntCounter::new(
        "chingu_decay_pruned_total",
        "Interaction score entries pruned below threshold"
    ).unwrap();

    // ============================================================================
    // Recommendation Metrics
    // ============================================================================

    /// Recommendation computations
    pub static ref RECOMMEND_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chingu_recommend_total", "Recommendation computations"),
        &["result"]
    ).unwrap();

    /// Recommendation computation duration
    pub static ref RECOMMEND_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "chingu_recommend_duration_seconds",
            "Recommendation computation duration"
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0])
    ).unwrap();
}

/// Register all metrics with the global registry
pub fn register_metrics() -> Result<(), prometheus::Error> {
    METRICS_REGISTRY.register(Box::new(MIRROR_APPLY_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(MIRROR_RETRY_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(DLQ_ENQUEUED_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(DLQ_REPLAYED_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(DLQ_PENDING.clone()))?;
    METRICS_REGISTRY.register(Box::new(DRAIN_SKIPPED_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(DECAY_RUNS_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(DECAY_PRUNED_TOTAL.clone()))?;

    METRICS_REGISTRY.register(Box::new(RECOMMEND_TOTAL.clone()))?;
    METRICS_REGISTRY.register(Box::new(RECOMMEND_DURATION.clone()))?;

    Ok(())
}

/// Helper to time operations with histogram (RAII pattern)
/// Usage: let _timer = Timer::new(RECOMMEND_DURATION.clone());
pub struct Timer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl Timer {
    /// Create timer that records duration to histogram on drop
    pub fn new(histogram: Histogram) -> Self {
        Self {
            histogram,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}
