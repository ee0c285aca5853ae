//! Durable key/value store abstraction.
//!
//! The store only sees opaque strings. Records are JSON-encoded
//! [`DurableRecord`]s so that any backend (browser-style storage, LMDB,
//! a remote KV) can hold them.

use async_trait::async_trait;
use ideafit_core::{now_millis, PersistenceError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-external string store that survives restarts.
///
/// Writes are allowed to fail (quota, I/O); callers treat every error as a
/// warning.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;

    async fn set(&self, key: &str, value: String) -> Result<(), PersistenceError>;

    async fn remove(&self, key: &str) -> Result<(), PersistenceError>;

    /// Remove every key starting with `prefix`, returning how many went.
    async fn remove_prefix(&self, prefix: &str) -> Result<usize, PersistenceError>;
}

/// A persisted value with the time it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord<T> {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub data: T,
}

impl<T> DurableRecord<T> {
    pub fn new(data: T) -> Self {
        Self {
            timestamp: now_millis(),
            data,
        }
    }

    pub fn with_timestamp(data: T, timestamp: i64) -> Self {
        Self { timestamp, data }
    }

    /// True while the record is younger than `ttl`.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        let age = now_millis().saturating_sub(self.timestamp);
        age < ttl.as_millis() as i64
    }
}

impl<T: Serialize> DurableRecord<T> {
    pub fn encode(&self, key: &str) -> Result<String, PersistenceError> {
        serde_json::to_string(self).map_err(|e| PersistenceError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

impl<T: DeserializeOwned> DurableRecord<T> {
    pub fn decode(key: &str, raw: &str) -> Result<Self, PersistenceError> {
        serde_json::from_str(raw).map_err(|e| PersistenceError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
