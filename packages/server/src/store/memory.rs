//! An in-memory [`StoreClient`] for tests and local smoke-testing, backed
//! by a [`DashMap`] for lock-free concurrent access (the same approach the
//! teacher's `HashMapStorage` takes for its storage engine). Lease
//! expiry is tracked lazily against `tokio::time::Instant` so tests can
//! drive it deterministically with a paused clock, rather than running a
//! background sweep task.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use shardkeeper_core::{KeyRange, Revision};
use tokio::time::{Duration, Instant};

use crate::error::CoordinatorError;
use crate::store::{KvEntry, LeaseId, StoreClient};

struct StoredValue {
    value: String,
    revision: Revision,
    lease: Option<LeaseId>,
}

/// In-memory, single-process stand-in for an etcd-like store.
pub struct MemoryStore {
    entries: DashMap<String, StoredValue>,
    leases: DashMap<LeaseId, Instant>,
    next_lease: AtomicI64,
    revision: AtomicI64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            leases: DashMap::new(),
            next_lease: AtomicI64::new(0),
            revision: AtomicI64::new(0),
        }
    }

    fn next_revision(&self) -> Revision {
        Revision(self.revision.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn is_live(&self, lease: Option<LeaseId>) -> bool {
        match lease {
            None => true,
            Some(id) => self
                .leases
                .get(&id)
                .is_some_and(|expiry| Instant::now() < *expiry),
        }
    }

    fn evict_expired(&self) {
        let dead: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !self.is_live(entry.value().lease))
            .map(|entry| entry.key().clone())
            .collect();
        for key in dead {
            self.entries.remove(&key);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn get_one(&self, key: &str) -> Result<Option<KvEntry>, CoordinatorError> {
        self.evict_expired();
        Ok(self.entries.get(key).map(|entry| KvEntry {
            key: key.to_string(),
            value: entry.value.clone(),
            revision: entry.revision,
        }))
    }

    async fn range(&self, range: &KeyRange) -> Result<Vec<KvEntry>, CoordinatorError> {
        self.evict_expired();
        Ok(self
            .entries
            .iter()
            .filter(|entry| {
                entry.key().as_str() >= range.start.as_str() && entry.key().as_str() < range.end.as_str()
            })
            .map(|entry| KvEntry {
                key: entry.key().clone(),
                value: entry.value().value.clone(),
                revision: entry.value().revision,
            })
            .collect())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<Revision, CoordinatorError> {
        let revision = self.next_revision();
        self.entries.insert(
            key.to_string(),
            StoredValue { value: value.to_string(), revision, lease },
        );
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinatorError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn grant_lease(&self, ttl_secs: u64) -> Result<LeaseId, CoordinatorError> {
        let id = self.next_lease.fetch_add(1, Ordering::SeqCst) + 1;
        self.leases.insert(id, Instant::now() + Duration::from_secs(ttl_secs));
        Ok(id)
    }
}
