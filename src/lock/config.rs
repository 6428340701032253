//! Lock Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{LockError, LockResult};

/// Lease timing for `LeaseLock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a lease lives without renewal (default: 5000)
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    /// Keep-alive renewal period (default: 1500)
    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,

    /// Upper bound on a release round-trip (default: 1000)
    #[serde(default = "default_release_timeout_ms")]
    pub release_timeout_ms: u64,

    /// Base backoff after a backend error while acquiring (default: 100)
    #[serde(default = "default_backend_retry_ms")]
    pub backend_retry_ms: u64,
}

fn default_lease_ttl_ms() -> u64 {
    5000
}
fn default_renew_interval_ms() -> u64 {
    1500
}
fn default_release_timeout_ms() -> u64 {
    1000
}
fn default_backend_retry_ms() -> u64 {
    100
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: default_lease_ttl_ms(),
            renew_interval_ms: default_renew_interval_ms(),
            release_timeout_ms: default_release_timeout_ms(),
            backend_retry_ms: default_backend_retry_ms(),
        }
    }
}

impl LockConfig {
    /// Short lease, fast renewal.
    pub fn with_ttl(ttl: Duration) -> Self {
        let ttl_ms = ttl.as_millis().max(2) as u64;
        Self {
            lease_ttl_ms: ttl_ms,
            renew_interval_ms: (ttl_ms / 3).max(1),
            ..Default::default()
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }

    pub fn backend_retry(&self) -> Duration {
        Duration::from_millis(self.backend_retry_ms)
    }

    /// Renewal must happen strictly inside the lease.
    pub fn validate(&self) -> LockResult<()> {
        if self.lease_ttl_ms == 0 {
            return Err(LockError::Misconfigured("lease_ttl_ms must be > 0".into()));
        }
        if self.renew_interval_ms == 0 || self.renew_interval_ms >= self.lease_ttl_ms {
            return Err(LockError::Misconfigured(format!(
                "renew_interval_ms must be in (0, {})",
                self.lease_ttl_ms
            )));
        }
        if self.release_timeout_ms == 0 {
            return Err(LockError::Misconfigured(
                "release_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = LockConfig::default();
        assert_eq!(config.lease_ttl(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_renew_must_be_inside_lease() {
        let config = LockConfig {
            renew_interval_ms: 5000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LockError::Misconfigured(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LockConfig = serde_json::from_str(r#"{"lease_ttl_ms": 900}"#).unwrap();
        assert_eq!(config.lease_ttl_ms, 900);
        assert_eq!(config.renew_interval_ms, 1500);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_ttl() {
        let config = LockConfig::with_ttl(Duration::from_millis(300));
        assert_eq!(config.renew_interval_ms, 100);
        assert!(config.validate().is_ok());
    }
}
