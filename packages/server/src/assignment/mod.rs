//! The assignment protocol: fair-share targets, the respond phase that
//! serves peers, and the acquisition phase that claims partitions in
//! prescribed order -- unassigned slots first, then busiest-peer
//! transfers, then partitions whose checkpoint has gone stale.

pub mod direct;
pub mod group;

use std::collections::{BTreeMap, HashMap};

use shardkeeper_core::{CoordinatorConfig, PartitionId, Revision, WorkerId, codec, keys, span};
use tokio::time::{Duration, Instant};
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::error::CoordinatorError;
use crate::registry::Registry;
use crate::store::StoreClient;

/// `floor(P / live_workers)`, the per-worker ownership target.
#[must_use]
pub fn fair_share(total_partitions: u32, live_workers: usize) -> u32 {
    if live_workers == 0 { 0 } else { total_partitions / live_workers as u32 }
}

/// The `parts/` subtree in one consistent snapshot: the total partition
/// count, every outstanding unassigned slot with the revision it became
/// unassigned at, and every live worker's current assignment list.
///
/// `parts/total`, `parts/unassigned/<p>` and `parts/<worker_id>` all share
/// the `parts/` prefix, so one ranged read returns all three as a single
/// consistent snapshot, rather than issuing three reads that could each
/// observe a different moment.
struct PartsSnapshot {
    total: u32,
    unassigned: Vec<(PartitionId, Revision)>,
    assignments: HashMap<WorkerId, Vec<PartitionId>>,
}

async fn parts_snapshot<S: StoreClient>(store: &S, config: &CoordinatorConfig) -> Result<PartsSnapshot, CoordinatorError> {
    let prefix = keys::assignment_prefix(config);
    let mut total = 0;
    let mut unassigned = Vec::new();
    let mut assignments = HashMap::new();

    for entry in store.range(&span(&prefix)).await? {
        let Some(rest) = entry.key.strip_prefix(&prefix) else { continue };
        if rest == "total" {
            total = entry.value.parse::<u32>().unwrap_or(0);
        } else if let Some(partition_str) = rest.strip_prefix("unassigned/") {
            if let Ok(partition_num) = partition_str.parse::<u32>() {
                unassigned.push((PartitionId(partition_num), entry.revision));
            }
        } else if let Ok(partitions) = codec::decode_partition_list(&entry.value) {
            assignments.insert(WorkerId::new(rest), partitions);
        }
    }
    Ok(PartsSnapshot { total, unassigned, assignments })
}

pub(crate) async fn total_partitions<S: StoreClient>(store: &S, config: &CoordinatorConfig) -> Result<u32, CoordinatorError> {
    let key = keys::total_key(config);
    let Some(entry) = store.get_one(&key).await? else { return Ok(0) };
    entry
        .value
        .parse::<u32>()
        .map_err(|_| CoordinatorError::Internal(anyhow::anyhow!("malformed parts/total value: {}", entry.value)))
}

async fn persist_assignment<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    worker_id: &WorkerId,
    owned: &BTreeMap<PartitionId, u64>,
) -> Result<(), CoordinatorError> {
    let key = keys::assignment_key(config, worker_id);
    let partitions: Vec<PartitionId> = owned.keys().copied().collect();
    store.put(&key, &codec::encode_partition_list(&partitions), None).await?;
    Ok(())
}

/// Claim finalization: clears the unassigned marker and any pause marker
/// the previous owner left, and seeds in-memory state from the
/// partition's last checkpoint so a re-claimed partition never re-emits
/// ids it already processed.
async fn finalize_claim<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    owned: &mut BTreeMap<PartitionId, u64>,
    partition: PartitionId,
    checkpoints: &CheckpointStore<S>,
) -> Result<(), CoordinatorError> {
    store.delete(&keys::unassigned_key(config, partition)).await?;
    store.delete(&keys::pause_key(config, partition)).await?;
    let last_id = checkpoints.read(partition).await?.map(|(id, _)| id).unwrap_or(0);
    owned.insert(partition, last_id);
    Ok(())
}

/// Respond phase: before issuing any new requests, serve peers that are
/// waiting on us -- vote on outstanding group requests, then answer at
/// most one direct request.
pub async fn respond_phase<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    worker_id: &WorkerId,
    owned: &mut BTreeMap<PartitionId, u64>,
    checkpoints: &CheckpointStore<S>,
    latest_stream_id: u64,
    now_seconds: u64,
) -> Result<(), CoordinatorError> {
    group::vote_on_group_requests(store, config, worker_id, owned, checkpoints, latest_stream_id, now_seconds).await?;

    if let Some(partition) = direct::respond_to_direct_request(store, config, worker_id, owned).await? {
        persist_assignment(store, config, worker_id, owned).await?;
        info!(%worker_id, %partition, "granted direct transfer to a peer");
    }
    Ok(())
}

/// Dead-peer cleanup: any worker holding an assignment entry that no
/// longer has a live registration gets its registration deleted and its
/// partitions moved to the unassigned pool. Run by every worker on every
/// checkin, so it doesn't depend on any one peer surviving to notice --
/// concurrent reaping of the same dead peer by several workers is
/// harmless (deletes are idempotent, and duplicate unassigned writes
/// just leave a fresher revision for the next group request to key off
/// of).
///
/// This only looks at registration, not checkpoint staleness -- a peer
/// can legitimately hold partitions it hasn't checkpointed yet (freshly
/// claimed, no messages seen), and folding the expired check in here
/// would reap it on the spot. Expired-but-registered peers are instead
/// handled per-partition by [`acquire_phase`]'s expired-partition pass.
async fn reclaim_dead_peers<S: StoreClient>(
    registry: &Registry<S>,
    assignments: &HashMap<WorkerId, Vec<PartitionId>>,
    worker_id: &WorkerId,
    live_ids: &[WorkerId],
) -> Result<(), CoordinatorError> {
    for peer_id in assignments.keys() {
        if peer_id == worker_id || live_ids.contains(peer_id) {
            continue;
        }
        let reaped = registry.reap_dead_peer(peer_id).await?;
        if !reaped.is_empty() {
            info!(%worker_id, peer = %peer_id, partitions = reaped.len(), "reclaimed a dead peer's partitions");
        }
    }
    Ok(())
}

/// Acquisition phase: unassigned slots first, then partitions taken from
/// the busiest overloaded peers, then partitions a live peer still lists
/// as its own but whose checkpoint has gone stale, until fair share is
/// reached or `TIMEOUT` elapses. Returns the partitions claimed via the
/// last (expired) pass, which the caller should put into strict mode.
#[allow(clippy::too_many_arguments)]
pub async fn acquire_phase<S: StoreClient>(
    store: &S,
    config: &CoordinatorConfig,
    worker_id: &WorkerId,
    owned: &mut BTreeMap<PartitionId, u64>,
    registry: &Registry<S>,
    checkpoints: &CheckpointStore<S>,
    solo_since: &mut Option<Instant>,
    latest_stream_id: u64,
    now_seconds: u64,
) -> Result<Vec<PartitionId>, CoordinatorError> {
    let live = registry.live_workers().await?;
    let live_ids: Vec<WorkerId> = live.into_iter().map(|w| w.worker_id).collect();

    if live_ids.len() <= 1 {
        solo_since.get_or_insert_with(Instant::now);
    } else {
        *solo_since = None;
    }

    let snapshot = parts_snapshot(store, config).await?;
    let fair = fair_share(snapshot.total, live_ids.len().max(1));
    let deadline = Instant::now() + Duration::from_secs(config.timeout_secs);
    let live_peers: Vec<WorkerId> = live_ids.iter().filter(|id| *id != worker_id).cloned().collect();

    reclaim_dead_peers(registry, &snapshot.assignments, worker_id, &live_ids).await?;

    for (partition, revision) in &snapshot.unassigned {
        if owned.len() as u32 >= fair || Instant::now() >= deadline {
            break;
        }
        if owned.contains_key(partition) {
            continue;
        }

        let outcome = group::request_group(
            store, config, worker_id, *partition, *revision, registry, checkpoints, latest_stream_id, &live_peers,
            Duration::from_millis(20), deadline, *solo_since,
        )
        .await?;
        if matches!(outcome, group::GroupOutcome::Granted) {
            finalize_claim(store, config, owned, *partition, checkpoints).await?;
            info!(%worker_id, partition = %partition, "claimed unassigned partition");
        }
    }

    if (owned.len() as u32) < fair {
        let mut loads: Vec<(WorkerId, usize)> = Vec::new();
        for peer in &live_peers {
            if let Some(partitions) = snapshot.assignments.get(peer) {
                if partitions.len() as u32 > fair {
                    loads.push((peer.clone(), partitions.len()));
                }
            }
        }
        loads.sort_by(|a, b| b.1.cmp(&a.1));

        for (peer, _) in loads {
            if owned.len() as u32 >= fair || Instant::now() >= deadline {
                break;
            }
            let outcome = direct::request_partition_from(store, config, worker_id, &peer, Duration::from_millis(20), deadline).await?;
            if let direct::DirectOutcome::Granted(partition) = outcome {
                finalize_claim(store, config, owned, partition, checkpoints).await?;
                info!(%worker_id, %partition, from = %peer, "acquired partition via direct transfer");
            }
        }
    }

    let mut claimed_via_expired_path = Vec::new();
    if (owned.len() as u32) < fair {
        'peers: for (peer, partitions) in &snapshot.assignments {
            if peer == worker_id {
                continue;
            }
            for &partition in partitions {
                if owned.len() as u32 >= fair || Instant::now() >= deadline {
                    break 'peers;
                }
                if owned.contains_key(&partition) {
                    continue;
                }
                let checkpoint_key = keys::checkpoint_key(config, partition);
                let Some(entry) = store.get_one(&checkpoint_key).await? else { continue };
                let Ok((last_id, stamped_at)) = codec::decode_checkpoint(&entry.value) else { continue };
                if !checkpoints.is_expired(Some((last_id, stamped_at)), latest_stream_id, now_seconds) {
                    continue;
                }

                let outcome = group::request_group(
                    store, config, worker_id, partition, entry.revision, registry, checkpoints, latest_stream_id,
                    &live_peers, Duration::from_millis(20), deadline, *solo_since,
                )
                .await?;
                if matches!(outcome, group::GroupOutcome::Granted) {
                    finalize_claim(store, config, owned, partition, checkpoints).await?;
                    claimed_via_expired_path.push(partition);
                    info!(%worker_id, %partition, from = %peer, "claimed expired partition via group transfer");
                }
            }
        }
    }

    persist_assignment(store, config, worker_id, owned).await?;
    Ok(claimed_via_expired_path)
}
