//! LMDB-backed durable store.
//!
//! Uses the heed crate (Rust bindings for LMDB) so dedup results survive a
//! process restart. Keys and values are UTF-8 strings in a single unnamed
//! database; namespace clearing is a prefix scan followed by one write
//! transaction.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use ideafit_core::{IdeaFitError, PersistenceError};

use super::durable::DurableStore;

/// Error type for opening the LMDB environment.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for IdeaFitError {
    fn from(e: LmdbStoreError) -> Self {
        IdeaFitError::Persistence(PersistenceError::WriteFailed {
            key: "lmdb environment".to_string(),
            reason: e.to_string(),
        })
    }
}

fn read_failed(key: &str, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::ReadFailed {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

fn write_failed(key: &str, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::WriteFailed {
        key: key.to_string(),
        reason: e.to_string(),
    }
}

/// Durable store on a memory-mapped LMDB environment.
pub struct LmdbDurableStore {
    env: Env,
    db: Database<Str, Str>,
}

impl LmdbDurableStore {
    /// Open (or create) a store under `path`.
    ///
    /// `max_size_mb` is the LMDB map size. Writes beyond it fail and are
    /// reported as `WriteFailed`.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self { env, db })
    }

    /// Number of stored keys.
    pub fn len(&self) -> Result<u64, PersistenceError> {
        let rtxn = self.env.read_txn().map_err(|e| read_failed("*", e))?;
        self.db.len(&rtxn).map_err(|e| read_failed("*", e))
    }

    pub fn is_empty(&self) -> Result<bool, PersistenceError> {
        Ok(self.len()? == 0)
    }

    fn collect_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, PersistenceError> {
        let rtxn = self.env.read_txn().map_err(|e| read_failed(prefix, e))?;
        let iter = self.db.iter(&rtxn).map_err(|e| read_failed(prefix, e))?;

        let mut keys = Vec::new();
        for result in iter {
            match result {
                Ok((key, _)) if key.starts_with(prefix) => keys.push(key.to_string()),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "Skipping unreadable LMDB entry");
                }
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl DurableStore for LmdbDurableStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let rtxn = self.env.read_txn().map_err(|e| read_failed(key, e))?;
        let value = self
            .db
            .get(&rtxn, key)
            .map_err(|e| read_failed(key, e))?
            .map(str::to_string);
        Ok(value)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError> {
        let mut wtxn = self.env.write_txn().map_err(|e| write_failed(key, e))?;
        self.db
            .put(&mut wtxn, key, &value)
            .map_err(|e| write_failed(key, e))?;
        wtxn.commit().map_err(|e| write_failed(key, e))
    }

    async fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let mut wtxn = self.env.write_txn().map_err(|e| write_failed(key, e))?;
        self.db
            .delete(&mut wtxn, key)
            .map_err(|e| write_failed(key, e))?;
        wtxn.commit().map_err(|e| write_failed(key, e))
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize, PersistenceError> {
        let keys = self.collect_keys_with_prefix(prefix)?;

        let mut wtxn = self.env.write_txn().map_err(|e| write_failed(prefix, e))?;
        let mut deleted = 0usize;
        for key in &keys {
            if self
                .db
                .delete(&mut wtxn, key)
                .map_err(|e| write_failed(key, e))?
            {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(|e| write_failed(prefix, e))?;

        Ok(deleted)
    }
}

impl std::fmt::Debug for LmdbDurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbDurableStore")
            .field("path", &self.env.path())
            .finish()
    }
}
