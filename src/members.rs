//! Member directory for batched name resolution
//!
//! The ranker resolves candidate and acquaintance names in one pass over
//! this store (`names_of` uses `multi_get`) to avoid N+1 lookups.

use rocksdb::{Options, DB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::errors::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    pub member_id: i64,
    pub name: String,
}

pub struct MemberDirectory {
    db: Arc<DB>,
}

fn member_key(member_id: i64) -> Vec<u8> {
    format!("m:{member_id}").into_bytes()
}

impl MemberDirectory {
    pub fn new(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let db = DB::open(&opts, path)?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn upsert(&self, member_id: i64, name: &str) -> Result<()> {
        let record = MemberRecord {
            member_id,
            name: name.to_string(),
        };
        self.db.put(member_key(member_id), bincode::serialize(&record)?)?;
        Ok(())
    }

    pub fn name_of(&self, member_id: i64) -> Result<Option<String>> {
        match self.db.get(member_key(member_id))? {
            Some(bytes) => Ok(Some(bincode::deserialize::<MemberRecord>(&bytes)?.name)),
            None => Ok(None),
        }
    }

    /// Batched name resolution; missing ids are simply absent from the map.
    pub fn names_of(&self, member_ids: &[i64]) -> Result<HashMap<i64, String>> {
        let keys: Vec<Vec<u8>> = member_ids.iter().map(|id| member_key(*id)).collect();
        let mut names = HashMap::with_capacity(member_ids.len());

        for (id, result) in member_ids.iter().zip(self.db.multi_get(keys)) {
            match result {
                Ok(Some(bytes)) => match bincode::deserialize::<MemberRecord>(&bytes) {
                    Ok(record) => {
                        names.insert(*id, record.name);
                    }
                    Err(e) => {
                        tracing::warn!(member_id = id, error = %e, "skipping corrupt member record");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(member_id = id, error = %e, "member lookup failed (continuing)");
                }
            }
        }
        Ok(names)
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| crate::errors::EngineError::Storage(e.to_string()))
    }
}
