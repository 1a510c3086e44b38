//! The worker loop: pulls `(id, payload)` pairs from a producer, runs
//! periodic checkins, and delivers owned ids to a sink, checkpointing
//! before each delivery.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use shardkeeper_core::{CoordinatorConfig, PartitionId, WorkerId, keys};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::assignment::{self, total_partitions};
use crate::checkpoint::CheckpointStore;
use crate::error::CoordinatorError;
use crate::registry::{Registry, now_seconds};
use crate::store::StoreClient;

/// A pull source of `(id, payload)` pairs with non-decreasing, non-negative
/// ids. Implementations forward the id itself as the payload when the
/// underlying message has none to carry.
#[async_trait]
pub trait Producer: Send {
    type Payload: Send;

    async fn next(&mut self) -> Option<(u64, Self::Payload)>;
}

/// The downstream destination. `deliver` is called once per message this
/// worker owns, synchronously after the checkpoint write that claims it.
#[async_trait]
pub trait Sink: Send + Sync {
    type Payload: Send;

    async fn deliver(&self, partition: PartitionId, payload: Self::Payload) -> Result<(), CoordinatorError>;

    /// Strict-mode delivery: the destination must accept `payload` and
    /// advance its own checkpoint record from `expected_previous` to
    /// `new_checkpoint` as one atomic compare-and-swap, returning `Ok(false)`
    /// on a CAS conflict rather than erroring. Sinks that don't support a
    /// CAS fall back to plain delivery, which forfeits the exactly-once
    /// guarantee strict mode exists to provide.
    async fn deliver_checked(
        &self,
        partition: PartitionId,
        payload: Self::Payload,
        expected_previous: Option<u64>,
        new_checkpoint: u64,
    ) -> Result<bool, CoordinatorError> {
        let _ = (expected_previous, new_checkpoint);
        self.deliver(partition, payload).await.map(|()| true)
    }
}

/// One worker process's coordinator instance.
pub struct WorkerLoop<S: StoreClient> {
    config: Arc<CoordinatorConfig>,
    worker_id: WorkerId,
    store: Arc<S>,
    registry: Registry<S>,
    checkpoints: CheckpointStore<S>,
    owned: BTreeMap<PartitionId, u64>,
    strict: HashSet<PartitionId>,
    last_cas_conflict: HashMap<PartitionId, Instant>,
    solo_since: Option<Instant>,
    last_checkin: Option<Instant>,
    total_partitions: u32,
}

impl<S: StoreClient> WorkerLoop<S> {
    pub fn new(store: Arc<S>, config: Arc<CoordinatorConfig>, worker_id: WorkerId, ip: String) -> Self {
        let registry = Registry::new(store.clone(), config.clone(), worker_id.clone(), ip);
        let checkpoints = CheckpointStore::new(store.clone(), config.clone());
        Self {
            config,
            worker_id,
            store,
            registry,
            checkpoints,
            owned: BTreeMap::new(),
            strict: HashSet::new(),
            last_cas_conflict: HashMap::new(),
            solo_since: None,
            last_checkin: None,
            total_partitions: 0,
        }
    }

    /// Currently owned partitions and their last processed id.
    #[must_use]
    pub fn owned_partitions(&self) -> &BTreeMap<PartitionId, u64> {
        &self.owned
    }

    async fn checkin(&mut self, latest_stream_id: u64) -> Result<(), CoordinatorError> {
        let now = now_seconds();
        assignment::respond_phase(
            &*self.store, &self.config, &self.worker_id, &mut self.owned, &self.checkpoints, latest_stream_id, now,
        )
        .await?;
        let claimed_via_expired_path = assignment::acquire_phase(
            &*self.store, &self.config, &self.worker_id, &mut self.owned, &self.registry, &self.checkpoints,
            &mut self.solo_since, latest_stream_id, now,
        )
        .await?;
        if self.config.strict_mode_enabled {
            for partition in claimed_via_expired_path {
                self.enter_strict_mode(partition);
            }
        }
        self.last_checkin = Some(Instant::now());
        Ok(())
    }

    async fn pause_partition(&self, partition: PartitionId) -> Result<(), CoordinatorError> {
        self.store.put(&keys::pause_key(&self.config, partition), "1", None).await?;
        Ok(())
    }

    /// Runs the message loop against `producer`, delivering to `sink`, until
    /// the producer is exhausted.
    pub async fn run<P, K>(&mut self, producer: &mut P, sink: &K) -> Result<(), CoordinatorError>
    where
        P: Producer,
        K: Sink<Payload = P::Payload>,
    {
        self.registry.register().await?;
        self.total_partitions = total_partitions(&*self.store, &self.config).await?;
        self.checkin(0).await?;

        while let Some((id, payload)) = producer.next().await {
            let heartbeat = Duration::from_secs(self.config.heartbeat_secs);
            let due = self.last_checkin.is_none_or(|at| at.elapsed() > heartbeat);
            if due {
                if let Err(err) = self.checkin(id).await {
                    if err.is_recoverable() {
                        warn!(worker = %self.worker_id, error = %err, "checkin failed, retrying next cycle");
                    } else {
                        return Err(err);
                    }
                }
            }

            if self.total_partitions == 0 {
                continue;
            }
            let partition = PartitionId(u32::try_from(id % u64::from(self.total_partitions)).unwrap_or(0));
            let Some(&last_id) = self.owned.get(&partition) else { continue };
            if id <= last_id {
                continue;
            }

            self.deliver_one(partition, id, payload, sink).await?;
        }
        Ok(())
    }

    async fn deliver_one<K>(&mut self, partition: PartitionId, id: u64, payload: K::Payload, sink: &K) -> Result<(), CoordinatorError>
    where
        K: Sink,
    {
        let now = now_seconds();
        if self.strict.contains(&partition) {
            let previous = self.checkpoints.read(partition).await?.map(|(last_id, _)| last_id);
            match sink.deliver_checked(partition, payload, previous, id).await {
                Ok(true) => {
                    self.checkpoints.write(partition, id, now).await?;
                    self.owned.insert(partition, id);
                    self.maybe_exit_strict_mode(partition);
                }
                Ok(false) => {
                    warn!(%partition, "strict-mode CAS conflict, pausing partition");
                    self.last_cas_conflict.insert(partition, Instant::now());
                    self.pause_partition(partition).await?;
                }
                Err(err) if err.is_recoverable() => {
                    warn!(%partition, error = %err, "destination write failed");
                }
                Err(err) => return Err(err),
            }
            return Ok(());
        }

        self.checkpoints.write(partition, id, now).await?;
        self.owned.insert(partition, id);
        sink.deliver(partition, payload).await?;
        Ok(())
    }

    /// Marks `partition` as acquired via the expired-group path, entering
    /// strict (CAS-checkpointed) processing for it.
    pub fn enter_strict_mode(&mut self, partition: PartitionId) {
        info!(%partition, "entering strict mode");
        self.strict.insert(partition);
        self.last_cas_conflict.insert(partition, Instant::now());
    }

    /// Leaves strict mode once a full `Z`-second window has passed without
    /// a CAS conflict on `partition`.
    fn maybe_exit_strict_mode(&mut self, partition: PartitionId) {
        let Some(&conflict_at) = self.last_cas_conflict.get(&partition) else { return };
        if conflict_at.elapsed() >= Duration::from_secs(self.config.z_solo_secs) {
            info!(%partition, "leaving strict mode after a quiet window");
            self.strict.remove(&partition);
            self.last_cas_conflict.remove(&partition);
        }
    }

    /// Graceful shutdown: deregister and release owned partitions.
    pub async fn shutdown(&mut self) -> Result<(), CoordinatorError> {
        self.registry.deregister().await?;
        self.owned.clear();
        Ok(())
    }
}
