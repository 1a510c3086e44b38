//! Tunables shared by every component of the coordinator.
//!
//! `CoordinatorConfig` is the plain, runtime-agnostic settings record.
//! The `shardkeeper` crate's CLI binary layers `clap` parsing on top and
//! produces one of these; nothing in this crate depends on an argument
//! parser or an async runtime.

/// Runtime configuration for one coordinator instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Key prefix under which all coordinator state lives in the store.
    pub root: String,
    /// Seconds between checkin passes (respond to peers, then acquire).
    pub heartbeat_secs: u64,
    /// Seconds bound on the request-issuing phase of one checkin.
    pub timeout_secs: u64,
    /// Max id-lag before a partition's checkpoint is considered expired.
    pub n_expired: u64,
    /// Max checkpoint age, in seconds, before a partition is considered expired.
    pub x_expired_secs: u64,
    /// Seconds a worker must be the sole live worker before a solo group
    /// request is allowed to succeed without other voters.
    pub z_solo_secs: u64,
    /// Whether partitions acquired via the expired-group path enter strict
    /// (CAS-checkpointed) processing mode.
    pub strict_mode_enabled: bool,
}

impl CoordinatorConfig {
    /// A lease's TTL is a fixed multiple of the heartbeat interval, so
    /// that a single missed heartbeat never causes a worker to be
    /// pronounced dead.
    #[must_use]
    pub fn lease_ttl_secs(&self) -> u64 {
        self.heartbeat_secs * 10
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            root: "/shardkeeper/".to_string(),
            heartbeat_secs: 1,
            timeout_secs: 2,
            n_expired: 1000,
            x_expired_secs: 60,
            z_solo_secs: 10,
            strict_mode_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_one_second_heartbeat_two_second_timeout() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.heartbeat_secs, 1);
        assert_eq!(config.timeout_secs, 2);
    }

    #[test]
    fn lease_ttl_is_ten_heartbeats() {
        let config = CoordinatorConfig {
            heartbeat_secs: 3,
            ..CoordinatorConfig::default()
        };
        assert_eq!(config.lease_ttl_secs(), 30);
    }
}
