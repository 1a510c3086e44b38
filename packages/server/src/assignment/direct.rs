//! Direct (1:1) partition transfer: a targeted ask answered by exactly
//! the peer it names, with the recipient choosing which partition (if
//! any) to hand over.

use std::collections::BTreeMap;

use shardkeeper_core::{CoordinatorConfig, PartitionId, Revision, WorkerId, codec, keys};
use tokio::time::{Duration, Instant};

use crate::error::CoordinatorError;
use crate::store::StoreClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectOutcome {
    Granted(PartitionId),
    TimedOut,
}

/// Requestor side. Issues one request at `recipient`, then polls for an ack
/// until `deadline`, enforcing that the ack's revision matches the request
/// it answers.
pub async fn request_partition_from<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    requestor_id: &WorkerId,
    recipient: &WorkerId,
    poll_interval: Duration,
    deadline: Instant,
) -> Result<DirectOutcome, CoordinatorError> {
    let request_key = keys::direct_request_key(config, recipient);
    let value = codec::encode_direct_request(requestor_id.as_str());
    let request_revision = store.put(&request_key, &value, None).await?;

    let ack_key = keys::direct_ack_key(config, requestor_id, recipient);
    loop {
        if let Some(entry) = store.get_one(&ack_key).await? {
            let (ack_revision, partition) = codec::decode_direct_ack(&entry.value)?;
            store.delete(&ack_key).await?;
            if ack_revision != request_revision {
                return Err(CoordinatorError::AckRevisionMismatch {
                    requested: request_revision,
                    acked: ack_revision,
                });
            }
            return Ok(DirectOutcome::Granted(partition));
        }
        if Instant::now() >= deadline {
            store.delete(&request_key).await?;
            return Ok(DirectOutcome::TimedOut);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Recipient side, run once per checkin. Answers at most one direct
/// request, granting an arbitrary owned partition -- partition choice is
/// deliberately left to the recipient, not the requestor.
pub async fn respond_to_direct_request<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    my_id: &WorkerId,
    owned: &mut BTreeMap<PartitionId, u64>,
) -> Result<Option<PartitionId>, CoordinatorError> {
    let key = keys::direct_request_key(config, my_id);
    let Some(entry) = store.get_one(&key).await? else { return Ok(None) };
    let requestor = codec::decode_direct_request(&entry.value)?;

    let Some((&partition, _)) = owned.iter().next() else { return Ok(None) };
    owned.remove(&partition);

    let ack_key = keys::direct_ack_key(config, &WorkerId::new(requestor), my_id);
    let ack_value = codec::encode_direct_ack(entry.revision, partition);
    store.put(&ack_key, &ack_value, None).await?;
    store.delete(&key).await?;
    Ok(Some(partition))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig { root: "/cc/".to_string(), ..CoordinatorConfig::default() }
    }

    #[tokio::test]
    async fn recipient_with_nothing_owned_ignores_request() {
        let store = Arc::new(MemoryStore::new());
        let config = config();
        store.put(&keys::direct_request_key(&config, &WorkerId::new("b")), "a", None).await.unwrap();

        let mut owned = BTreeMap::new();
        let granted = respond_to_direct_request(&*store, &config, &WorkerId::new("b"), &mut owned).await.unwrap();
        assert_eq!(granted, None);
    }

    #[tokio::test]
    async fn full_direct_transfer_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let config = config();
        let requestor = WorkerId::new("t");
        let recipient = WorkerId::new("b");

        let mut recipient_owned: BTreeMap<PartitionId, u64> = BTreeMap::from([(PartitionId(3), 0), (PartitionId(4), 10)]);

        let deadline = Instant::now() + Duration::from_secs(2);
        let store_for_requestor = store.clone();
        let config_clone = config.clone();
        let requestor_clone = requestor.clone();
        let recipient_clone = recipient.clone();
        let requestor_task = tokio::spawn(async move {
            request_partition_from(&*store_for_requestor, &config_clone, &requestor_clone, &recipient_clone, Duration::from_millis(5), deadline).await
        });

        // Give the requestor a chance to write its request before the recipient answers.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let granted = respond_to_direct_request(&*store, &config, &recipient, &mut recipient_owned).await.unwrap();
        assert!(granted.is_some());

        let outcome = requestor_task.await.unwrap().unwrap();
        assert_eq!(outcome, DirectOutcome::Granted(granted.unwrap()));
        assert_eq!(recipient_owned.len(), 1);
    }

    #[tokio::test]
    async fn request_with_no_response_times_out_and_cleans_up() {
        let store = Arc::new(MemoryStore::new());
        let config = config();
        let deadline = Instant::now() + Duration::from_millis(30);
        let outcome = request_partition_from(&*store, &config, &WorkerId::new("t"), &WorkerId::new("b"), Duration::from_millis(5), deadline)
            .await
            .unwrap();
        assert_eq!(outcome, DirectOutcome::TimedOut);
        assert!(store.get_one(&keys::direct_request_key(&config, &WorkerId::new("b"))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mismatched_ack_revision_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let config = config();
        let requestor = WorkerId::new("t");
        let recipient = WorkerId::new("b");

        store.put(&keys::direct_request_key(&config, &recipient), "t", None).await.unwrap();
        let bogus_ack = codec::encode_direct_ack(Revision(999_999), PartitionId(1));
        store.put(&keys::direct_ack_key(&config, &requestor, &recipient), &bogus_ack, None).await.unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        let err = request_partition_from(&*store, &config, &requestor, &recipient, Duration::from_millis(5), deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AckRevisionMismatch { .. }));
    }
}
