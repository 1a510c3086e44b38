//! Encodes and decodes the small, comma-delimited text values the protocol
//! stores in the key-value store. These are intentionally not `serde`
//! structures: every value is a handful of bytes and the format is part
//! of the wire contract with any non-Rust peer sharing the store.

use crate::error::CodecError;
use crate::ids::{PartitionId, Revision};

/// A direct request's value is just the requestor's id: the revision that
/// identifies the request is the store's own mod_revision of the `req/`
/// key, not anything embedded in the value (see the direct-transfer
/// grounding note in this crate's design ledger for why). Kept as a
/// dedicated pair of functions, rather than a bare `to_string()`/`From`,
/// so the request value's format stays a single, greppable place to
/// change it.
#[must_use]
pub fn encode_direct_request(requestor_id: &str) -> String {
    requestor_id.to_string()
}

pub fn decode_direct_request(value: &str) -> Result<String, CodecError> {
    if value.is_empty() {
        return Err(CodecError::Malformed { field: "direct_request", value: value.to_string() });
    }
    Ok(value.to_string())
}

/// Encodes a worker's owned partitions as the comma-separated `parts/<id>`
/// value. An empty slice encodes to the empty string.
#[must_use]
pub fn encode_partition_list(partitions: &[PartitionId]) -> String {
    partitions
        .iter()
        .map(PartitionId::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Decodes a `parts/<id>` value back into partition ids. Rejects anything
/// that doesn't parse as a u32, since a malformed assignment list would
/// otherwise silently drop partitions from bookkeeping.
pub fn decode_partition_list(value: &str) -> Result<Vec<PartitionId>, CodecError> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map(PartitionId)
                .map_err(|_| CodecError::Malformed {
                    field: "partition_list",
                    value: value.to_string(),
                })
        })
        .collect()
}

/// Encodes a checkpoint value: `"<last_id>,<wallclock_seconds>"`.
#[must_use]
pub fn encode_checkpoint(last_id: u64, wallclock_seconds: u64) -> String {
    format!("{last_id},{wallclock_seconds}")
}

/// Decodes a checkpoint value into `(last_id, wallclock_seconds)`.
pub fn decode_checkpoint(value: &str) -> Result<(u64, u64), CodecError> {
    let (id, ts) = value.split_once(',').ok_or_else(|| CodecError::Malformed {
        field: "checkpoint",
        value: value.to_string(),
    })?;
    let id = id
        .parse::<u64>()
        .map_err(|_| CodecError::Malformed { field: "checkpoint.last_id", value: value.to_string() })?;
    let ts = ts
        .parse::<u64>()
        .map_err(|_| CodecError::Malformed { field: "checkpoint.timestamp", value: value.to_string() })?;
    Ok((id, ts))
}

/// Encodes a direct-ack value: `"<revision>,<granted_partition>"`.
#[must_use]
pub fn encode_direct_ack(revision: Revision, granted_partition: PartitionId) -> String {
    format!("{},{}", revision.0, granted_partition.0)
}

/// Decodes a direct-ack value into `(revision, granted_partition)`.
pub fn decode_direct_ack(value: &str) -> Result<(Revision, PartitionId), CodecError> {
    let (rev, partition) = value.split_once(',').ok_or_else(|| CodecError::Malformed {
        field: "direct_ack",
        value: value.to_string(),
    })?;
    let rev = rev
        .parse::<i64>()
        .map_err(|_| CodecError::Malformed { field: "direct_ack.revision", value: value.to_string() })?;
    let partition = partition
        .parse::<u32>()
        .map_err(|_| CodecError::Malformed { field: "direct_ack.partition", value: value.to_string() })?;
    Ok((Revision(rev), PartitionId(partition)))
}

/// Encodes a group-request value: the revision alone.
#[must_use]
pub fn encode_group_request(revision: Revision) -> String {
    revision.0.to_string()
}

/// Decodes a group-request value.
pub fn decode_group_request(value: &str) -> Result<Revision, CodecError> {
    value
        .parse::<i64>()
        .map(Revision)
        .map_err(|_| CodecError::Malformed { field: "group_request", value: value.to_string() })
}

/// A group-ack vote: `Ok` grants the transfer, `Deny` refuses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Ok,
    Deny,
}

#[must_use]
pub fn encode_vote(vote: Vote) -> &'static str {
    match vote {
        Vote::Ok => "1",
        Vote::Deny => "0",
    }
}

pub fn decode_vote(value: &str) -> Result<Vote, CodecError> {
    match value {
        "1" => Ok(Vote::Ok),
        "0" => Ok(Vote::Deny),
        _ => Err(CodecError::Malformed { field: "vote", value: value.to_string() }),
    }
}


/// Property-based tests for the codecs whose values cross into the store
/// as the protocol's actual wire format.
#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    fn arb_partition_list() -> impl Strategy<Value = Vec<PartitionId>> {
        proptest::collection::vec(0_u32..10_000, 0..16).prop_map(|ids| ids.into_iter().map(PartitionId).collect())
    }

    proptest! {
        #[test]
        fn partition_list_round_trips_for_any_list(partitions in arb_partition_list()) {
            let encoded = encode_partition_list(&partitions);
            prop_assert_eq!(decode_partition_list(&encoded).unwrap(), partitions);
        }

        #[test]
        fn checkpoint_round_trips_for_any_id_and_timestamp(last_id: u64, wallclock_seconds: u64) {
            let encoded = encode_checkpoint(last_id, wallclock_seconds);
            prop_assert_eq!(decode_checkpoint(&encoded).unwrap(), (last_id, wallclock_seconds));
        }

        #[test]
        fn direct_ack_round_trips_for_any_revision_and_partition(revision: i64, partition_id: u32) {
            let encoded = encode_direct_ack(Revision(revision), PartitionId(partition_id));
            prop_assert_eq!(decode_direct_ack(&encoded).unwrap(), (Revision(revision), PartitionId(partition_id)));
        }
    }
}
