//! Cold tier: an optional, slower key/value store behind the hot store.
//!
//! The cache writes to it behind the request path and reads from it before
//! going to the origin. Every failure here is logged by the caller and
//! otherwise ignored.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock, duration_millis};
use super::http::CachedResponse;
use super::policy::PolicySnapshot;
use crate::error::ColdStoreError;

/// What the cold tier keeps per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColdRecord {
    pub key: String,
    pub response: CachedResponse,
    pub policy: PolicySnapshot,
    /// Absolute Unix milliseconds after which the record is useless.
    pub expires_at_ms: u64,
}

#[async_trait]
pub trait ColdStore: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<ColdRecord>, ColdStoreError>;

    /// Store `record`, keeping it for at most `ttl`.
    async fn set(&self, key: &str, record: &ColdRecord, ttl: Duration)
    -> Result<(), ColdStoreError>;

    async fn delete(&self, key: &str) -> Result<(), ColdStoreError>;
}

/// Process-local cold store, mostly useful for tests and for sharing one cold
/// tier between several caches.
#[derive(Debug)]
pub struct MemoryColdStore {
    records: DashMap<String, (ColdRecord, u64)>,
    clock: Arc<dyn Clock>,
}

impl MemoryColdStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }
}

impl Default for MemoryColdStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl ColdStore for MemoryColdStore {
    async fn get(&self, key: &str) -> Result<Option<ColdRecord>, ColdStoreError> {
        let now = self.clock.now_millis();
        let record = self
            .records
            .get(key)
            .map(|stored| stored.value().clone());
        match record {
            Some((_, kept_until)) if kept_until <= now => {
                self.records.remove(key);
                Ok(None)
            }
            Some((record, _)) => Ok(Some(record)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        record: &ColdRecord,
        ttl: Duration,
    ) -> Result<(), ColdStoreError> {
        let kept_until = self
            .clock
            .now_millis()
            .saturating_add(duration_millis(ttl));
        self.records
            .insert(key.to_string(), (record.clone(), kept_until));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ColdStoreError> {
        self.records.remove(key);
        Ok(())
    }
}
