//! The thin key-value-plus-lease adapter every other component talks to.
//! `StoreClient` is the capability set the design is polymorphic over: an
//! etcd cluster ([`etcd::EtcdStoreClient`]) or an in-memory test double
//! ([`memory::MemoryStore`]) both satisfy it, and nothing above this
//! layer assumes multi-key transactions.

pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use shardkeeper_core::{KeyRange, Revision};

use crate::error::CoordinatorError;

/// Opaque handle to a granted lease, returned by [`StoreClient::grant_lease`]
/// and passed back into [`StoreClient::put`] to bind a key's lifetime to it.
pub type LeaseId = i64;

/// One key-value pair as observed in a single read, tagged with the
/// store-assigned revision at which it was last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: String,
    pub revision: Revision,
}

/// The store contract. Implementations must not assume callers will
/// compose multiple calls into a transaction; every method is a single,
/// independently linearizable operation.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Reads one key. Returns `None` if absent.
    async fn get_one(&self, key: &str) -> Result<Option<KvEntry>, CoordinatorError>;

    /// Reads every key in `range` in one consistent snapshot.
    async fn range(&self, range: &KeyRange) -> Result<Vec<KvEntry>, CoordinatorError>;

    /// Writes `value` to `key`, optionally binding it to a lease. Returns
    /// the revision the store assigned to this write, which callers use as
    /// the protocol's logical-clock value for anything derived from this
    /// write.
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<Revision, CoordinatorError>;

    /// Deletes `key`. Deleting an absent key is success, not an error.
    async fn delete(&self, key: &str) -> Result<(), CoordinatorError>;

    /// Grants a lease that expires after `ttl_secs` unless refreshed by a
    /// further `put` against a key bound to it.
    async fn grant_lease(&self, ttl_secs: u64) -> Result<LeaseId, CoordinatorError>;
}
