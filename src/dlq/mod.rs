//! Dead-letter queue: durable rows for failed mirror mutations plus the
//! periodic replay scheduler that drains them.

pub mod reprocessor;
pub mod store;

pub use reprocessor::{
    DlqReprocessor, DrainReport, RedisReplayTarget, ReplayTarget, ReprocessorConfig,
};
pub use store::{DlqEventType, DlqStats, DlqStatus, DlqStore, FriendEventDlq};
