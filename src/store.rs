//! Persistent cache abstraction
//!
//! Records are upserted on every successful fetch of a durable route and are
//! never expired here; freshness is decided by the reader against a
//! route-specific max age.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// A payload persisted under a cache key signature
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentRecord {
    pub payload: Value,
    pub updated_at: DateTime<Utc>,
}

impl PersistentRecord {
    /// True if the record is at most `max_age` old at `now`
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match chrono::Duration::from_std(max_age) {
            Ok(max_age) => now.signed_duration_since(self.updated_at) <= max_age,
            Err(_) => true,
        }
    }

    /// Age of the record at `now`, clamped at zero
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.updated_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Durable key-value store for provider payloads
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Reads the record stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<PersistentRecord>, StoreError>;

    /// Inserts or replaces the record under `key` (last writer wins)
    async fn upsert(
        &self,
        key: &str,
        payload: &Value,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Returns the name of this store
    fn store_name(&self) -> &'static str;
}

/// Process-local store, for tests and deployments without a database
pub struct InMemoryStore {
    records: RwLock<HashMap<String, PersistentRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<PersistentRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn upsert(
        &self,
        key: &str,
        payload: &Value,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let record = PersistentRecord {
            payload: payload.clone(),
            updated_at,
        };
        self.records.write().await.insert(key.to_string(), record);
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}
