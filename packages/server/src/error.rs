//! The coordinator's top-level error type, covering the kinds enumerated
//! in the error handling design: a flaky store, a protocol violation, a
//! destination write failure, and a double `init`.

use shardkeeper_core::{CodecError, Revision};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The store failed to serve a request. Recoverable: the caller retries
    /// on the next checkin cycle.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),

    /// A direct ack's revision didn't match the request it answers. This is
    /// a protocol violation, not a transient condition.
    #[error("ack revision mismatch: requested at {requested}, acked at {acked}")]
    AckRevisionMismatch { requested: Revision, acked: Revision },

    /// `init` was called against a store that already has the init flag set.
    #[error("store is already initialized")]
    AlreadyInitialized,

    /// The sink, or a strict-mode compare-and-swap against the destination,
    /// failed.
    #[error("destination write failed: {0}")]
    DestinationWrite(String),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoordinatorError {
    #[must_use]
    pub fn store_unavailable(source: impl Into<anyhow::Error>) -> Self {
        Self::StoreUnavailable(source.into())
    }

    /// Errors for which the worker loop should log and continue past,
    /// rather than propagate out of the checkin cycle.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::DestinationWrite(_))
    }
}
