//! chingu-graph Library
//!
//! Friend-graph recommendation engine for a social-network backend.
//!
//! # Key Features
//! - Weighted union-find degree calculator (1st/2nd/3rd-degree reachability)
//! - Ranked recommendations with Korean acquaintance text
//! - Decaying interaction scores in Redis zsets (additive, capped, nightly decay)
//! - Friendship mirror in Redis sets, reconciled from domain events
//! - Dead-letter queue with batched-then-per-item replay and bounded retry
//!
//! The relational source of truth (friendship edges, member directory, DLQ
//! rows) lives in embedded RocksDB; Redis holds the denormalized mirror and
//! the score zsets. Store handles are passed explicitly into components.

pub mod config;
pub mod constants;
pub mod dlq;
pub mod errors;
pub mod events;
pub mod friendship;
pub mod interaction;
pub mod members;
pub mod metrics;
pub mod mirror;
pub mod recommend;

// Re-export dependencies to ensure tests use the same version
pub use chrono;
pub use uuid;
