//! Cluster bootstrap: creates the `init` flag, the total partition count,
//! and one unassigned slot per partition. Refuses to run against an
//! already-initialized store.

use shardkeeper_core::{CoordinatorConfig, PartitionId, keys};

use crate::error::CoordinatorError;
use crate::store::StoreClient;

/// Initializes a fresh cluster with `total_partitions` partitions.
///
/// # Errors
///
/// Returns [`CoordinatorError::AlreadyInitialized`] if the store's `init`
/// flag is already set.
pub async fn init<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    total_partitions: u32,
) -> Result<(), CoordinatorError> {
    if store.get_one(&keys::init_key(config)).await?.is_some() {
        return Err(CoordinatorError::AlreadyInitialized);
    }

    store.put(&keys::init_key(config), "1", None).await?;
    store.put(&keys::total_key(config), &total_partitions.to_string(), None).await?;
    for n in 0..total_partitions {
        store.put(&keys::unassigned_key(config, PartitionId(n)), "", None).await?;
    }
    Ok(())
}
