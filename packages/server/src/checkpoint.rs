//! Per-partition progress tracking.

use std::sync::Arc;

use shardkeeper_core::{CoordinatorConfig, PartitionId, codec, keys};

use crate::error::CoordinatorError;
use crate::store::StoreClient;

pub struct CheckpointStore<S: StoreClient> {
    store: Arc<S>,
    config: Arc<CoordinatorConfig>,
}

impl<S: StoreClient> CheckpointStore<S> {
    pub fn new(store: Arc<S>, config: Arc<CoordinatorConfig>) -> Self {
        Self { store, config }
    }

    pub async fn write(&self, partition: PartitionId, last_id: u64, now_seconds: u64) -> Result<(), CoordinatorError> {
        let key = keys::checkpoint_key(&self.config, partition);
        let value = codec::encode_checkpoint(last_id, now_seconds);
        self.store.put(&key, &value, None).await?;
        Ok(())
    }

    /// Returns `(last_id, wallclock_seconds)`, or `None` if the partition
    /// has never been checkpointed.
    pub async fn read(&self, partition: PartitionId) -> Result<Option<(u64, u64)>, CoordinatorError> {
        let key = keys::checkpoint_key(&self.config, partition);
        let Some(entry) = self.store.get_one(&key).await? else { return Ok(None) };
        Ok(Some(codec::decode_checkpoint(&entry.value)?))
    }

    /// A partition is expired if its checkpoint lags the observed stream
    /// id by more than `n_expired`, or its wallclock timestamp is older
    /// than `x_expired_secs`.
    #[must_use]
    pub fn is_expired(&self, checkpoint: Option<(u64, u64)>, latest_stream_id: u64, now_seconds: u64) -> bool {
        match checkpoint {
            None => true,
            Some((last_id, stamped_at)) => {
                latest_stream_id.saturating_sub(last_id) > self.config.n_expired
                    || now_seconds.saturating_sub(stamped_at) > self.config.x_expired_secs
            }
        }
    }
}
