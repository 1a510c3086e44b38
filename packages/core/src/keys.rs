//! Builds the flat `/`-delimited key namespace described in the data model,
//! and the half-open ranges used to scan a prefix.
//!
//! All functions here are pure: they take `&CoordinatorConfig` (for the
//! `root` prefix) and the relevant identifiers, and return owned `String`s.
//! Nothing here talks to the store.

use crate::config::CoordinatorConfig;
use crate::ids::{PartitionId, Revision, WorkerId};

/// A half-open `[start, end)` byte range over all keys sharing `prefix`.
///
/// Equivalent to the original prototype's `span()` helper: the end bound is
/// `prefix` with its last byte incremented, which bounds every key that
/// starts with `prefix` without needing a sentinel suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
}

#[must_use]
pub fn span(prefix: &str) -> KeyRange {
    let mut end = prefix.as_bytes().to_vec();
    loop {
        match end.last_mut() {
            Some(byte) if *byte == 0xff => {
                end.pop();
            }
            Some(byte) => {
                *byte += 1;
                break;
            }
            None => break,
        }
    }
    KeyRange {
        start: prefix.to_string(),
        // Invariant: `prefix` is always built from ASCII path segments in
        // this module, so the incremented byte string stays valid UTF-8.
        end: String::from_utf8(end).expect("prefix is ASCII"),
    }
}

#[must_use]
pub fn init_key(config: &CoordinatorConfig) -> String {
    format!("{}init", config.root)
}

#[must_use]
pub fn total_key(config: &CoordinatorConfig) -> String {
    format!("{}parts/total", config.root)
}

#[must_use]
pub fn unassigned_key(config: &CoordinatorConfig, partition: PartitionId) -> String {
    format!("{}parts/unassigned/{}", config.root, partition)
}

#[must_use]
pub fn unassigned_prefix(config: &CoordinatorConfig) -> String {
    format!("{}parts/unassigned/", config.root)
}

#[must_use]
pub fn assignment_key(config: &CoordinatorConfig, worker: &WorkerId) -> String {
    format!("{}parts/{}", config.root, worker)
}

#[must_use]
pub fn assignment_prefix(config: &CoordinatorConfig) -> String {
    format!("{}parts/", config.root)
}

#[must_use]
pub fn registration_key(config: &CoordinatorConfig, worker: &WorkerId, ip: &str) -> String {
    format!("{}workers/{}/{}", config.root, worker, ip)
}

#[must_use]
pub fn registration_worker_prefix(config: &CoordinatorConfig, worker: &WorkerId) -> String {
    format!("{}workers/{}/", config.root, worker)
}

#[must_use]
pub fn registration_prefix(config: &CoordinatorConfig) -> String {
    format!("{}workers/", config.root)
}

#[must_use]
pub fn checkpoint_key(config: &CoordinatorConfig, partition: PartitionId) -> String {
    format!("{}checkpoint/{}", config.root, partition)
}

#[must_use]
pub fn direct_request_key(config: &CoordinatorConfig, recipient: &WorkerId) -> String {
    format!("{}req/{}", config.root, recipient)
}

#[must_use]
pub fn direct_request_prefix(config: &CoordinatorConfig) -> String {
    format!("{}req/", config.root)
}

#[must_use]
pub fn direct_ack_key(config: &CoordinatorConfig, requestor: &WorkerId, recipient: &WorkerId) -> String {
    format!("{}ack/{}/{}", config.root, requestor, recipient)
}

#[must_use]
pub fn direct_ack_prefix(config: &CoordinatorConfig, requestor: &WorkerId) -> String {
    format!("{}ack/{}/", config.root, requestor)
}

#[must_use]
pub fn group_request_key(
    config: &CoordinatorConfig,
    partition: PartitionId,
    requestor: &WorkerId,
) -> String {
    format!("{}group-req/{}/{}", config.root, partition, requestor)
}

#[must_use]
pub fn group_request_partition_prefix(config: &CoordinatorConfig, partition: PartitionId) -> String {
    format!("{}group-req/{}/", config.root, partition)
}

#[must_use]
pub fn group_request_prefix(config: &CoordinatorConfig) -> String {
    format!("{}group-req/", config.root)
}

#[must_use]
pub fn group_ack_key(
    config: &CoordinatorConfig,
    requestor: &WorkerId,
    revision: Revision,
    partition: PartitionId,
    voter: &WorkerId,
) -> String {
    format!(
        "{}ack/{}/group/{}/{}/{}",
        config.root, requestor, revision, partition, voter
    )
}

#[must_use]
pub fn group_ack_prefix(
    config: &CoordinatorConfig,
    requestor: &WorkerId,
    revision: Revision,
    partition: PartitionId,
) -> String {
    format!(
        "{}ack/{}/group/{}/{}/",
        config.root, requestor, revision, partition
    )
}

#[must_use]
pub fn pause_key(config: &CoordinatorConfig, partition: PartitionId) -> String {
    format!("{}paused/{}", config.root, partition)
}


/// Property-based tests for `span()`, since a broken prefix-to-range
/// conversion would silently under- or over-match keys in every ranged
/// read in the protocol.
#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn prefix_itself_and_any_direct_child_key_fall_inside_the_range(
            prefix in "[a-z/]{1,12}",
            suffix in "[a-z0-9]{0,8}",
        ) {
            let range = span(&prefix);
            let child = format!("{prefix}{suffix}");
            prop_assert!(child.as_str() >= range.start.as_str());
            prop_assert!(child.as_str() < range.end.as_str());
        }

        #[test]
        fn a_sibling_key_one_byte_past_the_prefix_falls_outside_the_range(prefix in "[a-z]{1,12}") {
            let range = span(&prefix);
            let mut sibling = prefix.into_bytes();
            *sibling.last_mut().unwrap() += 1;
            let sibling = String::from_utf8(sibling).unwrap();
            prop_assert!(sibling.as_str() >= range.end.as_str());
        }
    }
}
