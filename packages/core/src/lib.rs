//! Domain types, key layout, and value codecs for the partition-assignment
//! coordinator. This crate is synchronous and has no store client, no
//! async runtime, and no CLI parsing: it exists so the wire-level
//! contract can be unit-tested and reused without pulling in `tokio` or a
//! concrete store implementation.

pub mod codec;
pub mod config;
pub mod error;
pub mod ids;
pub mod keys;

pub use codec::{Vote, decode_checkpoint, decode_direct_ack, decode_direct_request, decode_group_request,
    decode_partition_list, decode_vote, encode_checkpoint, encode_direct_ack, encode_direct_request,
    encode_group_request, encode_partition_list, encode_vote};
pub use config::CoordinatorConfig;
pub use error::CodecError;
pub use ids::{PartitionId, Revision, WorkerId};
pub use keys::{KeyRange, span};

#[cfg(test)]
mod integration_tests {
    use super::*;

    /// Every type and function re-exported from the crate root must be
    /// reachable without reaching into submodules.
    #[test]
    fn root_exports_are_accessible() {
        let config = CoordinatorConfig::default();
        let worker = WorkerId::new("w1");
        let partition = PartitionId(3);
        let revision = Revision(9);

        let key = keys::assignment_key(&config, &worker);
        assert!(key.contains("w1"));

        let encoded = encode_partition_list(&[partition]);
        assert_eq!(decode_partition_list(&encoded).unwrap(), vec![partition]);

        let encoded_ack = encode_direct_ack(revision, partition);
        assert_eq!(decode_direct_ack(&encoded_ack).unwrap(), (revision, partition));

        let range: KeyRange = span(&config.root);
        assert_eq!(range.start, config.root);
    }

    #[test]
    fn fair_share_partitions_across_live_workers() {
        // floor(P / live_workers), per the glossary's "fair share" definition.
        fn fair_share(total_partitions: u32, live_workers: usize) -> u32 {
            if live_workers == 0 {
                0
            } else {
                total_partitions / live_workers as u32
            }
        }

        assert_eq!(fair_share(7, 2), 3);
        assert_eq!(fair_share(7, 0), 0);
        assert_eq!(fair_share(7, 8), 0);
        assert_eq!(fair_share(6, 1), 6);
    }
}
