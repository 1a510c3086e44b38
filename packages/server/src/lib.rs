//! Decentralized partition-assignment coordination over a strongly
//! consistent key-value store with leases.
//!
//! No component in this crate is a central master; every worker runs the
//! same checkin loop ([`worker::WorkerLoop`]) against a shared store
//! ([`store::StoreClient`]), and ownership converges through direct and
//! group transfer requests ([`assignment`]).

pub mod assignment;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod init;
pub mod registry;
pub mod store;
pub mod worker;

pub use error::CoordinatorError;
pub use store::{KvEntry, LeaseId, StoreClient};
pub use worker::{Producer, Sink, WorkerLoop};
