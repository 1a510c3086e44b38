//! Domain identifiers for the partition-assignment protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for one coordinator process.
///
/// Workers choose their own id at startup (typically a UUID or hostname);
/// the protocol treats it as an opaque, comparable string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for WorkerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One of the `P` logical partitions of the stream's id space.
///
/// Partitions are dense: for a cluster with `P` total partitions, valid ids
/// are `0..P`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl PartitionId {
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The store's monotonically increasing per-write sequence number.
///
/// This is the protocol's sole logical clock: it orders writes, matches
/// requests to acks, and breaks ties between competing group requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(pub i64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Revision {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_roundtrips_through_display() {
        let id = WorkerId::new("worker-a");
        assert_eq!(id.as_str(), "worker-a");
        assert_eq!(id.to_string(), "worker-a");
    }

    #[test]
    fn partition_id_ordering_is_numeric() {
        let mut ids = vec![PartitionId(3), PartitionId(1), PartitionId(2)];
        ids.sort();
        assert_eq!(ids, vec![PartitionId(1), PartitionId(2), PartitionId(3)]);
    }

    #[test]
    fn revision_compares_numerically() {
        assert!(Revision(5) < Revision(10));
    }
}
