//! Rules Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{RulesError, RulesResult};

/// Health and eligibility policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Catch-up polling period (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest acceptable distance behind the parent, in position steps (default: 100)
    #[serde(default = "default_max_lag")]
    pub max_lag: u64,

    /// Nodes never considered for promotion
    #[serde(default)]
    pub excluded_uids: Vec<String>,
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_lag() -> u64 {
    100
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_lag: default_max_lag(),
            excluded_uids: Vec::new(),
        }
    }
}

impl RulesConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn is_excluded(&self, uid: &str) -> bool {
        self.excluded_uids.iter().any(|u| u == uid)
    }

    pub fn validate(&self) -> RulesResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(RulesError::Misconfigured(
                "poll_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: RulesConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RulesConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = RulesConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exclusion() {
        let config = RulesConfig {
            excluded_uids: vec!["backup-1".into()],
            ..Default::default()
        };
        assert!(config.is_excluded("backup-1"));
        assert!(!config.is_excluded("2"));
    }
}
