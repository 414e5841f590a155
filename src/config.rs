//! Configuration management for chingu-graph
//!
//! All configurable parameters in one place with environment variable
//! overrides. Sensible defaults, configurable in production.

use std::env;
use std::path::PathBuf;
use tracing::info;

use crate::constants::{
    DLQ_BATCH_SIZE, DLQ_MAX_RETRY, INTERACTION_DECAY_FACTOR, MIRROR_BACKOFF_BASE_MS,
    MIRROR_MAX_ATTEMPTS,
};

/// Engine configuration loaded from environment with defaults
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Server host address (default: 127.0.0.1)
    /// Set to 0.0.0.0 for Docker or network-accessible deployments
    pub host: String,

    /// Server port (default: 4040)
    pub port: u16,

    /// Storage path for RocksDB stores (default: ./chingu_graph_data)
    pub storage_path: PathBuf,

    /// Redis connection URL (default: redis://127.0.0.1:6379)
    pub redis_url: String,

    /// DLQ drain interval in seconds (default: 300 = 5 minutes)
    pub drain_interval_secs: u64,

    /// Maximum DLQ rows fetched per drain cycle (default: 100)
    pub drain_batch_size: usize,

    /// UTC hour at which the nightly score decay runs (default: 3)
    pub decay_hour_utc: u32,

    /// Multiplicative decay factor per nightly pass (default: 0.95)
    /// Scores lose 5% each night: s_new = s_old * 0.95
    pub interaction_decay_factor: f64,

    /// Mirror retry attempts on the listener path (default: 3)
    pub mirror_max_attempts: u32,

    /// Initial mirror retry backoff in milliseconds (default: 200)
    pub mirror_backoff_base_ms: u64,

    /// Replay attempts before a DLQ row turns terminal (default: 3)
    pub dlq_max_retry: u32,

    /// Event channel capacity between publishers and the listener (default: 1024)
    pub event_queue_capacity: usize,

    /// Whether running in production mode
    pub is_production: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4040,
            storage_path: PathBuf::from("./chingu_graph_data"),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            drain_interval_secs: 300, // 5 minutes
            drain_batch_size: DLQ_BATCH_SIZE,
            decay_hour_utc: 3,
            interaction_decay_factor: INTERACTION_DECAY_FACTOR,
            mirror_max_attempts: MIRROR_MAX_ATTEMPTS,
            mirror_backoff_base_ms: MIRROR_BACKOFF_BASE_MS,
            dlq_max_retry: DLQ_MAX_RETRY,
            event_queue_capacity: 1024,
            is_production: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults
    #[allow(clippy::field_reassign_with_default)] // Environment overrides require mutable config
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Check production mode first
        config.is_production = env::var("CHINGU_ENV")
            .map(|v| {
                let v = v.to_lowercase();
                v == "production" || v == "prod"
            })
            .unwrap_or(false);

        // Host (bind address)
        if let Ok(val) = env::var("CHINGU_HOST") {
            config.host = val;
        }

        // Port
        if let Ok(val) = env::var("CHINGU_PORT") {
            if let Ok(port) = val.parse() {
                config.port = port;
            }
        }

        // Storage path
        if let Ok(val) = env::var("CHINGU_STORAGE_PATH") {
            config.storage_path = PathBuf::from(val);
        }

        // Redis URL
        if let Ok(val) = env::var("CHINGU_REDIS_URL") {
            config.redis_url = val;
        }

        // Drain scheduler
        if let Ok(val) = env::var("CHINGU_DRAIN_INTERVAL") {
            if let Ok(n) = val.parse::<u64>() {
                config.drain_interval_secs = n.max(10);
            }
        }

        if let Ok(val) = env::var("CHINGU_DRAIN_BATCH") {
            if let Ok(n) = val.parse::<usize>() {
                config.drain_batch_size = n.clamp(1, 1000);
            }
        }

        // Nightly decay
        if let Ok(val) = env::var("CHINGU_DECAY_HOUR") {
            if let Ok(n) = val.parse::<u32>() {
                config.decay_hour_utc = n.min(23);
            }
        }

        if let Ok(val) = env::var("CHINGU_DECAY_FACTOR") {
            if let Ok(n) = val.parse::<f64>() {
                config.interaction_decay_factor = n.clamp(0.5, 0.99);
            }
        }

        // Mirror retry policy
        if let Ok(val) = env::var("CHINGU_MIRROR_ATTEMPTS") {
            if let Ok(n) = val.parse::<u32>() {
                config.mirror_max_attempts = n.clamp(1, 10);
            }
        }

        if let Ok(val) = env::var("CHINGU_MIRROR_BACKOFF_MS") {
            if let Ok(n) = val.parse() {
                config.mirror_backoff_base_ms = n;
            }
        }

        // DLQ retry ceiling
        if let Ok(val) = env::var("CHINGU_DLQ_MAX_RETRY") {
            if let Ok(n) = val.parse::<u32>() {
                config.dlq_max_retry = n.clamp(1, 10);
            }
        }

        // Event queue
        if let Ok(val) = env::var("CHINGU_EVENT_QUEUE") {
            if let Ok(n) = val.parse::<usize>() {
                config.event_queue_capacity = n.clamp(16, 65536);
            }
        }

        config
    }

    /// Log the current configuration
    pub fn log(&self) {
        info!("📋 Configuration:");
        info!(
            "   Mode: {}",
            if self.is_production {
                "PRODUCTION"
            } else {
                "Development"
            }
        );
        info!("   Bind: {}:{}", self.host, self.port);
        info!("   Storage: {:?}", self.storage_path);
        info!("   Redis: {}", self.redis_url);
        info!(
            "   DLQ drain: every {}s, batch {}, retry ceiling {}",
            self.drain_interval_secs, self.drain_batch_size, self.dlq_max_retry
        );
        info!(
            "   Decay: nightly at {:02}:00 UTC, factor {}",
            self.decay_hour_utc, self.interaction_decay_factor
        );
        info!(
            "   Mirror retry: {} attempts, base backoff {}ms",
            self.mirror_max_attempts, self.mirror_backoff_base_ms
        );
    }
}
