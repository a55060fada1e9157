//! Authority configuration.
//!
//! [`AuthorityConfig`] controls cache lifetime and the write-behind flush
//! cadence. Defaults suit a single authority serving a few dozen workers;
//! the builder-style setters override individual fields.

use std::time::Duration;

use crate::cache::DEFAULT_TTL;

/// Tunables for the authority data manager.
#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// TTL applied to every cache `set`.
    ///
    /// Default: **30 minutes**.
    pub cache_ttl: Duration,

    /// Maximum number of cached entities.
    ///
    /// Default: **100 000**.
    pub cache_capacity: u64,

    /// Interval between background flushes of the write queue.
    ///
    /// Default: **5 seconds**.
    pub flush_interval: Duration,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            cache_capacity: 100_000,
            flush_interval: Duration::from_secs(5),
        }
    }
}

impl AuthorityConfig {
    /// Configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the cache capacity.
    pub fn with_cache_capacity(mut self, capacity: u64) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = AuthorityConfig::default();
        assert_eq!(cfg.cache_ttl, Duration::from_secs(1800));
        assert_eq!(cfg.cache_capacity, 100_000);
        assert_eq!(cfg.flush_interval, Duration::from_secs(5));
    }

    #[test]
    fn builder_chain() {
        let cfg = AuthorityConfig::new()
            .with_cache_ttl(Duration::from_secs(60))
            .with_flush_interval(Duration::from_millis(250));
        assert_eq!(cfg.cache_ttl, Duration::from_secs(60));
        assert_eq!(cfg.flush_interval, Duration::from_millis(250));
    }
}
