//! Group (N:1) partition transfer: reclaiming an unassigned slot or an
//! expired partition requires every live peer to vote, so that a worker
//! isolated by a network partition can't concurrently grant the same
//! partition to two different claimants.

use std::collections::{BTreeMap, HashSet};

use shardkeeper_core::{CoordinatorConfig, PartitionId, Revision, WorkerId, codec, keys, span};
use tokio::time::{Duration, Instant};

use crate::checkpoint::CheckpointStore;
use crate::error::CoordinatorError;
use crate::registry::{Registry, now_seconds};
use crate::store::StoreClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    Granted,
    Withdrawn,
    TimedOut,
}

/// Requestor side. `reference_revision` is the tie-breaking value this
/// request claims precedence at: the unassigned slot's revision, or the
/// stalest observed checkpoint revision for the expired-partition path.
#[allow(clippy::too_many_arguments)]
pub async fn request_group<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    requestor_id: &WorkerId,
    partition: PartitionId,
    reference_revision: Revision,
    registry: &Registry<S>,
    checkpoints: &CheckpointStore<S>,
    latest_stream_id: u64,
    live_peers: &[WorkerId],
    poll_interval: Duration,
    deadline: Instant,
    became_solo_at: Option<Instant>,
) -> Result<GroupOutcome, CoordinatorError> {
    let partition_prefix = keys::group_request_partition_prefix(config, partition);

    // Another peer is already ahead on this partition; don't contest it.
    if !store.range(&span(&partition_prefix)).await?.is_empty() {
        return Ok(GroupOutcome::Withdrawn);
    }

    let request_key = keys::group_request_key(config, partition, requestor_id);
    store
        .put(&request_key, &codec::encode_group_request(reference_revision), None)
        .await?;

    let mut pending: HashSet<WorkerId> = live_peers.iter().filter(|peer| *peer != requestor_id).cloned().collect();

    loop {
        // Tie-break against a lower-revision competitor.
        for competitor in store.range(&span(&partition_prefix)).await? {
            if competitor.key == request_key {
                continue;
            }
            if let Ok(competitor_revision) = codec::decode_group_request(&competitor.value) {
                if competitor_revision < reference_revision {
                    cleanup(store, config, requestor_id, reference_revision, partition, &request_key).await?;
                    return Ok(GroupOutcome::Withdrawn);
                }
            }
        }

        let ack_prefix = keys::group_ack_prefix(config, requestor_id, reference_revision, partition);
        let mut denied = false;
        for ack in store.range(&span(&ack_prefix)).await? {
            let Some(voter) = ack.key.strip_prefix(&ack_prefix) else { continue };
            match codec::decode_vote(&ack.value) {
                Ok(codec::Vote::Deny) => {
                    denied = true;
                    break;
                }
                Ok(codec::Vote::Ok) => {
                    pending.remove(&WorkerId::new(voter));
                }
                Err(_) => {}
            }
        }
        if denied {
            cleanup(store, config, requestor_id, reference_revision, partition, &request_key).await?;
            return Ok(GroupOutcome::Withdrawn);
        }

        // Drop peers that died, or fell silently stuck, while we waited on their vote.
        let mut still_pending = HashSet::new();
        for peer in pending {
            if !registry.is_dead(&peer, now_seconds(), checkpoints, latest_stream_id).await? {
                still_pending.insert(peer);
            }
        }
        pending = still_pending;

        let solo_timeout_elapsed = became_solo_at
            .is_some_and(|since| since.elapsed() >= Duration::from_secs(config.z_solo_secs));
        if pending.is_empty() || (live_peers.is_empty() && solo_timeout_elapsed) {
            cleanup(store, config, requestor_id, reference_revision, partition, &request_key).await?;
            return Ok(GroupOutcome::Granted);
        }

        if Instant::now() >= deadline {
            store.delete(&request_key).await?;
            return Ok(GroupOutcome::TimedOut);
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn cleanup<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    requestor: &WorkerId,
    revision: Revision,
    partition: PartitionId,
    request_key: &str,
) -> Result<(), CoordinatorError> {
    let ack_prefix = keys::group_ack_prefix(config, requestor, revision, partition);
    for entry in store.range(&span(&ack_prefix)).await? {
        store.delete(&entry.key).await?;
    }
    store.delete(request_key).await?;
    Ok(())
}

/// Voter side, run once per checkin against every outstanding group
/// request.
pub async fn vote_on_group_requests<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    my_id: &WorkerId,
    owned: &BTreeMap<PartitionId, u64>,
    checkpoints: &CheckpointStore<S>,
    latest_stream_id: u64,
    now: u64,
) -> Result<(), CoordinatorError> {
    let prefix = keys::group_request_prefix(config);
    for entry in store.range(&span(&prefix)).await? {
        let Some(rest) = entry.key.strip_prefix(&prefix) else { continue };
        let Some((partition_str, requestor_str)) = rest.split_once('/') else { continue };
        let Ok(partition_num) = partition_str.parse::<u32>() else { continue };
        let partition = PartitionId(partition_num);
        let requestor = WorkerId::new(requestor_str);
        let Ok(revision) = codec::decode_group_request(&entry.value) else { continue };

        let vote = decide_vote(store, config, my_id, owned, checkpoints, partition, revision, latest_stream_id, now).await?;

        let ack_key = keys::group_ack_key(config, &requestor, revision, partition, my_id);
        store.put(&ack_key, codec::encode_vote(vote), None).await?;
    }
    Ok(())
}

async fn decide_vote<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    my_id: &WorkerId,
    owned: &BTreeMap<PartitionId, u64>,
    checkpoints: &CheckpointStore<S>,
    partition: PartitionId,
    revision: Revision,
    latest_stream_id: u64,
    now: u64,
) -> Result<codec::Vote, CoordinatorError> {
    if owned.contains_key(&partition) {
        return Ok(codec::Vote::Deny);
    }

    let unassigned_key = keys::unassigned_key(config, partition);
    let matches_unassigned = store
        .get_one(&unassigned_key)
        .await?
        .is_some_and(|entry| entry.revision == revision);
    if matches_unassigned {
        return Ok(codec::Vote::Ok);
    }

    let my_own_request_key = keys::group_request_key(config, partition, my_id);
    let i_have_a_better_claim = store
        .get_one(&my_own_request_key)
        .await?
        .and_then(|entry| codec::decode_group_request(&entry.value).ok())
        .is_some_and(|my_revision| my_revision < revision);
    if i_have_a_better_claim {
        return Ok(codec::Vote::Deny);
    }

    let checkpoint = checkpoints.read(partition).await?;
    if checkpoints.is_expired(checkpoint, latest_stream_id, now) {
        Ok(codec::Vote::Ok)
    } else {
        Ok(codec::Vote::Deny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use std::sync::Arc;

    fn config() -> Arc<CoordinatorConfig> {
        Arc::new(CoordinatorConfig { root: "/cc/".to_string(), ..CoordinatorConfig::default() })
    }

    #[tokio::test]
    async fn solo_worker_claims_unassigned_slot_without_votes() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let unassigned_key = keys::unassigned_key(&config, PartitionId(6));
        let revision = store.put(&unassigned_key, "", None).await.unwrap();

        let registry = Registry::new(store.clone(), config.clone(), WorkerId::new("t"), "ip".to_string());
        registry.register().await.unwrap();
        let checkpoints = CheckpointStore::new(store.clone(), config.clone());

        let deadline = Instant::now() + Duration::from_secs(1);
        let outcome = request_group(
            &*store, &config, &WorkerId::new("t"), PartitionId(6), revision, &registry, &checkpoints, 0, &[],
            Duration::from_millis(5), deadline, Some(Instant::now() - Duration::from_secs(config.z_solo_secs + 1)),
        )
        .await
        .unwrap();
        assert_eq!(outcome, GroupOutcome::Granted);
    }

    #[tokio::test]
    async fn request_withdraws_when_a_peer_already_owns_it() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let unassigned_key = keys::unassigned_key(&config, PartitionId(6));
        let revision = store.put(&unassigned_key, "", None).await.unwrap();

        let requestor = WorkerId::new("t");
        let owner = WorkerId::new("b");
        let registry = Registry::new(store.clone(), config.clone(), requestor.clone(), "ip".to_string());
        registry.register().await.unwrap();
        let owner_registry = Registry::new(store.clone(), config.clone(), owner.clone(), "ip2".to_string());
        owner_registry.register().await.unwrap();

        let owned_by_b: BTreeMap<PartitionId, u64> = BTreeMap::from([(PartitionId(6), 5)]);
        let checkpoints = CheckpointStore::new(store.clone(), config.clone());

        let deadline = Instant::now() + Duration::from_millis(200);
        let store_for_requestor = store.clone();
        let config_clone = config.clone();
        let registry_clone = Registry::new(store.clone(), config.clone(), requestor.clone(), "ip".to_string());
        let checkpoints_clone = CheckpointStore::new(store.clone(), config.clone());
        let requestor_clone = requestor.clone();
        let live_peers = vec![owner.clone()];
        let requestor_task = tokio::spawn(async move {
            request_group(
                &*store_for_requestor, &config_clone, &requestor_clone, PartitionId(6), revision,
                &registry_clone, &checkpoints_clone, 10, &live_peers, Duration::from_millis(5), deadline, None,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        vote_on_group_requests(&*store, &config, &owner, &owned_by_b, &checkpoints, 10, now_seconds()).await.unwrap();

        let outcome = requestor_task.await.unwrap().unwrap();
        assert_eq!(outcome, GroupOutcome::Withdrawn);
    }

    #[tokio::test]
    async fn lower_revision_competitor_wins_tie_break() {
        let config = config();
        let store = Arc::new(MemoryStore::new());

        let low_key = keys::group_request_key(&config, PartitionId(6), &WorkerId::new("winner"));
        store.put(&low_key, &codec::encode_group_request(Revision(1)), None).await.unwrap();

        let registry = Registry::new(store.clone(), config.clone(), WorkerId::new("loser"), "ip".to_string());
        let checkpoints = CheckpointStore::new(store.clone(), config.clone());
        let deadline = Instant::now() + Duration::from_millis(200);

        let outcome = request_group(
            &*store, &config, &WorkerId::new("loser"), PartitionId(6), Revision(2), &registry, &checkpoints, 0, &[],
            Duration::from_millis(5), deadline, None,
        )
        .await
        .unwrap();
        assert_eq!(outcome, GroupOutcome::Withdrawn);
    }

    #[tokio::test]
    async fn expired_partition_held_by_a_silent_peer_is_granted() {
        let config = config();
        let store = Arc::new(MemoryStore::new());

        let requestor = WorkerId::new("t");
        let owner = WorkerId::new("a");
        let registry = Registry::new(store.clone(), config.clone(), requestor.clone(), "ip".to_string());
        registry.register().await.unwrap();
        let owner_registry = Registry::new(store.clone(), config.clone(), owner.clone(), "ip2".to_string());
        owner_registry.register().await.unwrap();
        store
            .put(&keys::assignment_key(&config, &owner), &codec::encode_partition_list(&[PartitionId(3)]), None)
            .await
            .unwrap();

        let checkpoints = CheckpointStore::new(store.clone(), config.clone());
        checkpoints.write(PartitionId(3), 1, 0).await.unwrap();
        let latest_stream_id = 10_000;

        let deadline = Instant::now() + Duration::from_millis(200);
        let live_peers = vec![owner];
        let outcome = request_group(
            &*store, &config, &requestor, PartitionId(3), Revision(1), &registry, &checkpoints, latest_stream_id,
            &live_peers, Duration::from_millis(5), deadline, None,
        )
        .await
        .unwrap();
        assert_eq!(outcome, GroupOutcome::Granted);
    }
}
