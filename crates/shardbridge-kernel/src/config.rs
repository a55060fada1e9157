//! RPC tuning knobs.

use std::time::Duration;

/// Per-call timeout applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(45);

/// Bound for every channel created by the bridge.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Settings shared by the RPC client and transports.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// How long a caller waits for a reply before giving up.
    pub timeout: Duration,
    pub channel_capacity: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RpcConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RpcConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(45));
        assert_eq!(config.channel_capacity, 256);
    }

    #[test]
    fn capacity_never_zero() {
        let config = RpcConfig::default().with_channel_capacity(0);
        assert_eq!(config.channel_capacity, 1);
    }
}
