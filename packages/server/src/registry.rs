//! Worker registration, liveness detection, and dead-peer cleanup.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use shardkeeper_core::{CoordinatorConfig, PartitionId, WorkerId, codec, keys, span};
use tracing::{info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::CoordinatorError;
use crate::store::{LeaseId, StoreClient};

#[must_use]
pub fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One peer's registration as observed in a `workers/` range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveWorker {
    pub worker_id: WorkerId,
    pub deadline_secs: u64,
}

pub struct Registry<S: StoreClient> {
    store: Arc<S>,
    config: Arc<CoordinatorConfig>,
    worker_id: WorkerId,
    ip: String,
    lease: RwLock<Option<LeaseId>>,
}

impl<S: StoreClient> Registry<S> {
    pub fn new(store: Arc<S>, config: Arc<CoordinatorConfig>, worker_id: WorkerId, ip: String) -> Self {
        Self { store, config, worker_id, ip, lease: RwLock::new(None) }
    }

    /// Announces this worker and (re-)grants its lease. Call once at
    /// startup and again every `HEARTBEAT` seconds.
    pub async fn register(&self) -> Result<(), CoordinatorError> {
        let ttl = self.config.lease_ttl_secs();
        let lease = self.store.grant_lease(ttl).await?;
        let deadline = now_seconds() + ttl;
        let key = keys::registration_key(&self.config, &self.worker_id, &self.ip);
        self.store.put(&key, &deadline.to_string(), Some(lease)).await?;
        *self.lease.write() = Some(lease);
        Ok(())
    }

    /// Ranged read of every live worker's registration.
    pub async fn live_workers(&self) -> Result<Vec<LiveWorker>, CoordinatorError> {
        let prefix = keys::registration_prefix(&self.config);
        let range = span(&prefix);
        let entries = self.store.range(&range).await?;

        let mut workers = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(rest) = entry.key.strip_prefix(&prefix) else { continue };
            let Some((worker, _ip)) = rest.split_once('/') else { continue };
            let Ok(deadline_secs) = entry.value.parse::<u64>() else { continue };
            workers.push(LiveWorker { worker_id: WorkerId::new(worker), deadline_secs });
        }
        Ok(workers)
    }

    /// True if `peer` has no current registration, its deadline has
    /// passed, or it still holds a partition whose checkpoint has gone
    /// stale. A worker stuck processing one partition is stuck on all of
    /// them (the checkin loop and the message loop share one task), so an
    /// expired partition is as good a death signal as a lapsed lease --
    /// and catches it sooner, since leases are sized to survive several
    /// missed heartbeats.
    pub async fn is_dead(
        &self,
        peer: &WorkerId,
        now: u64,
        checkpoints: &CheckpointStore<S>,
        latest_stream_id: u64,
    ) -> Result<bool, CoordinatorError> {
        let key = keys::registration_worker_prefix(&self.config, peer);
        let range = span(&key);
        let entries = self.store.range(&range).await?;
        let registration_dead = match entries.into_iter().next() {
            None => true,
            Some(entry) => match entry.value.parse::<u64>() {
                Ok(deadline) => deadline < now,
                Err(_) => true,
            },
        };
        if registration_dead {
            return Ok(true);
        }

        let assignment_key = keys::assignment_key(&self.config, peer);
        let Some(entry) = self.store.get_one(&assignment_key).await? else { return Ok(false) };
        let Ok(partitions) = codec::decode_partition_list(&entry.value) else { return Ok(false) };
        for partition in partitions {
            let checkpoint = checkpoints.read(partition).await?;
            if checkpoints.is_expired(checkpoint, latest_stream_id, now) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Deletes `peer`'s registration and moves every partition it held
    /// into the unassigned set, keyed by the revision of the unassign
    /// write.
    pub async fn reap_dead_peer(&self, peer: &WorkerId) -> Result<Vec<PartitionId>, CoordinatorError> {
        let reg_prefix = keys::registration_worker_prefix(&self.config, peer);
        let reg_range = span(&reg_prefix);
        for entry in self.store.range(&reg_range).await? {
            self.store.delete(&entry.key).await?;
        }

        let assignment_key = keys::assignment_key(&self.config, peer);
        let Some(entry) = self.store.get_one(&assignment_key).await? else {
            return Ok(Vec::new());
        };
        let partitions = codec::decode_partition_list(&entry.value)?;
        for &partition in &partitions {
            let unassigned_key = keys::unassigned_key(&self.config, partition);
            self.store.put(&unassigned_key, "", None).await?;
        }
        self.store.delete(&assignment_key).await?;

        if !partitions.is_empty() {
            warn!(worker = %peer, partitions = partitions.len(), "reaped dead peer");
        }
        Ok(partitions)
    }

    /// Graceful shutdown: delete our own registration and release our
    /// partitions back to the unassigned pool.
    pub async fn deregister(&self) -> Result<Vec<PartitionId>, CoordinatorError> {
        info!(worker = %self.worker_id, "deregistering");
        self.reap_dead_peer(&self.worker_id.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn config() -> Arc<CoordinatorConfig> {
        Arc::new(CoordinatorConfig { root: "/cc/".to_string(), ..CoordinatorConfig::default() })
    }

    #[tokio::test]
    async fn register_then_observed_in_live_workers() {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new(store, config(), WorkerId::new("a"), "10.0.0.1".to_string());
        registry.register().await.unwrap();

        let live = registry.live_workers().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].worker_id, WorkerId::new("a"));
    }

    #[tokio::test]
    async fn is_dead_true_for_unregistered_worker() {
        let store = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(store.clone(), config());
        let registry = Registry::new(store, config(), WorkerId::new("a"), "10.0.0.1".to_string());
        assert!(registry.is_dead(&WorkerId::new("ghost"), now_seconds(), &checkpoints, 0).await.unwrap());
    }

    #[tokio::test]
    async fn is_dead_false_while_deadline_in_future() {
        let store = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(store.clone(), config());
        let registry = Registry::new(store, config(), WorkerId::new("a"), "10.0.0.1".to_string());
        registry.register().await.unwrap();
        assert!(!registry.is_dead(&WorkerId::new("a"), now_seconds(), &checkpoints, 0).await.unwrap());
    }

    #[tokio::test]
    async fn is_dead_true_once_deadline_passed() {
        let store = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(store.clone(), config());
        let registry = Registry::new(store, config(), WorkerId::new("a"), "10.0.0.1".to_string());
        registry.register().await.unwrap();
        let far_future = now_seconds() + 1_000_000;
        assert!(registry.is_dead(&WorkerId::new("a"), far_future, &checkpoints, 0).await.unwrap());
    }

    #[tokio::test]
    async fn is_dead_true_when_registered_peer_holds_an_expired_partition() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(store.clone(), config.clone());
        let registry = Registry::new(store.clone(), config.clone(), WorkerId::new("t"), "ip".to_string());
        let peer = WorkerId::new("a");
        let peer_registry = Registry::new(store.clone(), config.clone(), peer.clone(), "ip2".to_string());
        peer_registry.register().await.unwrap();
        store
            .put(&keys::assignment_key(&config, &peer), &codec::encode_partition_list(&[PartitionId(3)]), None)
            .await
            .unwrap();
        checkpoints.write(PartitionId(3), 1, 0).await.unwrap();

        assert!(registry.is_dead(&peer, 1_000, &checkpoints, 2_000).await.unwrap());
    }

    #[tokio::test]
    async fn is_dead_false_for_registered_peer_with_fresh_checkpoints() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let checkpoints = CheckpointStore::new(store.clone(), config.clone());
        let registry = Registry::new(store.clone(), config.clone(), WorkerId::new("t"), "ip".to_string());
        let peer = WorkerId::new("a");
        let peer_registry = Registry::new(store.clone(), config.clone(), peer.clone(), "ip2".to_string());
        peer_registry.register().await.unwrap();
        store
            .put(&keys::assignment_key(&config, &peer), &codec::encode_partition_list(&[PartitionId(3)]), None)
            .await
            .unwrap();
        checkpoints.write(PartitionId(3), 1_990, now_seconds()).await.unwrap();

        assert!(!registry.is_dead(&peer, now_seconds(), &checkpoints, 2_000).await.unwrap());
    }

    #[tokio::test]
    async fn reap_dead_peer_moves_its_partitions_to_unassigned() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let key = keys::assignment_key(&config, &WorkerId::new("dead"));
        store.put(&key, &codec::encode_partition_list(&[PartitionId(1), PartitionId(2)]), None).await.unwrap();

        let registry = Registry::new(store.clone(), config.clone(), WorkerId::new("t"), "ip".to_string());
        let reaped = registry.reap_dead_peer(&WorkerId::new("dead")).await.unwrap();
        assert_eq!(reaped, vec![PartitionId(1), PartitionId(2)]);

        assert!(store.get_one(&key).await.unwrap().is_none());
        assert!(store.get_one(&keys::unassigned_key(&config, PartitionId(1))).await.unwrap().is_some());
        assert!(store.get_one(&keys::unassigned_key(&config, PartitionId(2))).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reap_dead_peer_with_no_assignment_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::new(store, config(), WorkerId::new("t"), "ip".to_string());
        let reaped = registry.reap_dead_peer(&WorkerId::new("nobody")).await.unwrap();
        assert!(reaped.is_empty());
    }
}
