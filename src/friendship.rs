//! Relational source of truth for friendship edges
//!
//! Undirected edges stored under both directional keys in a single
//! `WriteBatch`, so the table is symmetric by construction. The Redis
//! mirror (`mirror.rs`) is a denormalized copy of this store, reconciled
//! asynchronously.

use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::errors::{EngineError, Result};

/// Helper trait to safely iterate over RocksDB results with error logging.
/// Unlike `.flatten()` which silently ignores errors, this logs them.
trait LogErrors<T> {
    fn log_errors(self) -> impl Iterator<Item = T>;
}

impl<I, T, E> LogErrors<T> for I
where
    I: Iterator<Item = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    fn log_errors(self) -> impl Iterator<Item = T> {
        self.filter_map(|r| match r {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("RocksDB iterator error (continuing): {}", e);
                None
            }
        })
    }
}

/// Undirected friendship edge; the relational source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FriendshipEdge {
    pub member_a: i64,
    pub member_b: i64,
    pub created_at: DateTime<Utc>,
}

/// RocksDB-backed friendship table.
///
/// Key layout: `e:{member}:{friend}` → bincode [`FriendshipEdge`], written
/// under both orientations in one batch.
pub struct FriendshipStore {
    db: Arc<DB>,
}

fn edge_key(member_id: i64, friend_id: i64) -> Vec<u8> {
    format!("e:{member_id}:{friend_id}").into_bytes()
}

fn edge_prefix(member_id: i64) -> Vec<u8> {
    format!("e:{member_id}:").into_bytes()
}

impl FriendshipStore {
    pub fn new(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let db = DB::open(&opts, path)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Commit a new undirected edge. Both directional keys are written in
    /// one `WriteBatch`; the caller publishes the domain event afterwards.
    pub fn add_friendship(&self, member_id: i64, friend_id: i64) -> Result<FriendshipEdge> {
        if member_id == friend_id {
            return Err(EngineError::SelfRelation(member_id));
        }
        if self.are_friends(member_id, friend_id)? {
            return Err(EngineError::FriendshipExists {
                member_id,
                friend_id,
            });
        }

        let edge = FriendshipEdge {
            member_a: member_id,
            member_b: friend_id,
            created_at: Utc::now(),
        };
        let bytes = bincode::serialize(&edge)?;

        let mut batch = WriteBatch::default();
        batch.put(edge_key(member_id, friend_id), &bytes);
        batch.put(edge_key(friend_id, member_id), &bytes);
        self.db.write(batch)?;

        Ok(edge)
    }

    /// Remove an undirected edge; both orientations go in one batch.
    pub fn remove_friendship(&self, member_id: i64, friend_id: i64) -> Result<()> {
        if !self.are_friends(member_id, friend_id)? {
            return Err(EngineError::FriendshipNotFound {
                member_id,
                friend_id,
            });
        }

        let mut batch = WriteBatch::default();
        batch.delete(edge_key(member_id, friend_id));
        batch.delete(edge_key(friend_id, member_id));
        self.db.write(batch)?;

        Ok(())
    }

    pub fn are_friends(&self, member_id: i64, friend_id: i64) -> Result<bool> {
        Ok(self.db.get(edge_key(member_id, friend_id))?.is_some())
    }

    /// All direct friends of a member, ascending by id.
    pub fn friends_of(&self, member_id: i64) -> Result<Vec<i64>> {
        let prefix = edge_prefix(member_id);
        let iter = self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));

        let mut friends = Vec::new();
        for (key, value) in iter.log_errors() {
            if !key.starts_with(&prefix) {
                break;
            }
            match bincode::deserialize::<FriendshipEdge>(&value) {
                Ok(edge) => friends.push(edge.member_b),
                Err(e) => {
                    tracing::warn!(member_id, error = %e, "skipping corrupt friendship edge");
                }
            }
        }
        friends.sort_unstable();
        Ok(friends)
    }

    /// Edge record for a pair, if present.
    pub fn edge(&self, member_id: i64, friend_id: i64) -> Result<Option<FriendshipEdge>> {
        match self.db.get(edge_key(member_id, friend_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flush RocksDB to ensure data persistence (for graceful shutdown).
    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| EngineError::Storage(e.to_string()))
    }
}
