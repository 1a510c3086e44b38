//! Command-line configuration (`--flag` / `ENV_VAR`, clap-derived) that
//! resolves into a [`shardkeeper_core::CoordinatorConfig`] plus the
//! CLI-only fields the core config doesn't need to know about.

use clap::Parser;
use shardkeeper_core::CoordinatorConfig;

/// Decentralized partition-assignment coordinator.
#[derive(Debug, Parser)]
#[command(name = "shardkeeper", version, about)]
pub struct Cli {
    /// Comma-separated etcd endpoints.
    #[arg(long, env = "SHARDKEEPER_ETCD_ENDPOINTS", default_value = "http://127.0.0.1:2379")]
    pub etcd_endpoints: String,

    /// This worker's id. Must be unique within the cluster.
    #[arg(long, env = "SHARDKEEPER_WORKER_ID")]
    pub worker_id: String,

    /// This worker's advertised ip, stored alongside its registration.
    #[arg(long, env = "SHARDKEEPER_WORKER_IP", default_value = "127.0.0.1")]
    pub worker_ip: String,

    /// Key prefix under which all coordinator state lives.
    #[arg(long, env = "SHARDKEEPER_ROOT", default_value = "/shardkeeper/")]
    pub root: String,

    /// Seconds between checkin passes.
    #[arg(long, env = "SHARDKEEPER_HEARTBEAT_SECS", default_value_t = 1)]
    pub heartbeat_secs: u64,

    /// Seconds bound on the request-issuing phase of one checkin.
    #[arg(long, env = "SHARDKEEPER_TIMEOUT_SECS", default_value_t = 2)]
    pub timeout_secs: u64,

    /// Max id-lag before a partition's checkpoint is considered expired.
    #[arg(long, env = "SHARDKEEPER_N_EXPIRED", default_value_t = 1000)]
    pub n_expired: u64,

    /// Max checkpoint age, in seconds, before a partition is considered expired.
    #[arg(long, env = "SHARDKEEPER_X_EXPIRED_SECS", default_value_t = 60)]
    pub x_expired_secs: u64,

    /// Seconds a worker must be the sole live worker before a solo group
    /// request succeeds without other voters.
    #[arg(long, env = "SHARDKEEPER_Z_SOLO_SECS", default_value_t = 10)]
    pub z_solo_secs: u64,

    /// Disables strict (CAS-checkpointed) processing for expired-group claims.
    #[arg(long, env = "SHARDKEEPER_NO_STRICT_MODE")]
    pub no_strict_mode: bool,

    /// Bootstraps a fresh cluster with this many partitions, then exits.
    #[arg(long)]
    pub init: Option<u32>,
}

impl Cli {
    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            root: self.root.clone(),
            heartbeat_secs: self.heartbeat_secs,
            timeout_secs: self.timeout_secs,
            n_expired: self.n_expired,
            x_expired_secs: self.x_expired_secs,
            z_solo_secs: self.z_solo_secs,
            strict_mode_enabled: !self.no_strict_mode,
        }
    }

    #[must_use]
    pub fn etcd_endpoints(&self) -> Vec<String> {
        self.etcd_endpoints.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
    }
}
