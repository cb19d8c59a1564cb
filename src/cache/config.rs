//! Cache configuration.
//!
//! Built from the `[cache]` section of `herdcache.toml`, or directly by
//! library users.

use std::time::Duration;

const DEFAULT_CAPACITY_BYTES: u64 = 500 * 1024 * 1024;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 3600);
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ERROR_TTL: Duration = Duration::from_millis(200);
const DEFAULT_COLD_MIN_TTL: Duration = Duration::from_secs(3600);

/// Tuning knobs for [`ResponseCache`](super::ResponseCache).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Total cost the hot store may hold before evicting.
    pub capacity_bytes: u64,
    /// Ceiling on how long any entry stays in the hot store.
    pub max_age: Duration,
    /// How long a waiter blocks on an in-flight fetch before looking again.
    /// Also the lifetime of the in-flight placeholder.
    pub busy_timeout: Duration,
    /// Lifetime of negatively cached fetch failures.
    pub error_ttl: Duration,
    /// Entries with less remaining freshness are never written to the cold store.
    pub cold_min_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_CAPACITY_BYTES,
            max_age: DEFAULT_MAX_AGE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            error_ttl: DEFAULT_ERROR_TTL,
            cold_min_ttl: DEFAULT_COLD_MIN_TTL,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            capacity_bytes: settings.capacity_bytes.get(),
            max_age: settings.max_age,
            busy_timeout: settings.busy_timeout,
            error_ttl: settings.error_ttl,
            cold_min_ttl: settings.cold_min_ttl,
        }
    }
}

impl CacheConfig {
    pub fn with_capacity_bytes(mut self, capacity_bytes: u64) -> Self {
        self.capacity_bytes = capacity_bytes;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_error_ttl(mut self, error_ttl: Duration) -> Self {
        self.error_ttl = error_ttl;
        self
    }

    pub fn with_cold_min_ttl(mut self, cold_min_ttl: Duration) -> Self {
        self.cold_min_ttl = cold_min_ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use super::*;
    use crate::config::CacheSettings;

    #[test]
    fn default_config_values() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity_bytes, 500 * 1024 * 1024);
        assert_eq!(config.max_age, Duration::from_secs(86_400));
        assert_eq!(config.busy_timeout, Duration::from_secs(10));
        assert_eq!(config.error_ttl, Duration::from_millis(200));
        assert_eq!(config.cold_min_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn from_settings_copies_every_field() {
        let settings = CacheSettings {
            capacity_bytes: NonZeroU64::new(1234).expect("non-zero"),
            max_age: Duration::from_secs(60),
            busy_timeout: Duration::from_millis(50),
            error_ttl: Duration::from_millis(5),
            cold_min_ttl: Duration::from_secs(1),
        };

        let config = CacheConfig::from(&settings);
        assert_eq!(config.capacity_bytes, 1234);
        assert_eq!(config.max_age, Duration::from_secs(60));
        assert_eq!(config.busy_timeout, Duration::from_millis(50));
        assert_eq!(config.error_ttl, Duration::from_millis(5));
        assert_eq!(config.cold_min_ttl, Duration::from_secs(1));
    }
}
