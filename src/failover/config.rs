//! Failover Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{FailoverError, FailoverResult};

/// How much the engine relies on the outgoing primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakeoverMode {
    /// Wait for the candidate to reach the frozen primary position.
    #[default]
    Graceful,
    /// Skip the catch-up wait; tolerate an unreadable primary position.
    Hostile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Takeover mode (default: graceful)
    #[serde(default)]
    pub mode: TakeoverMode,

    /// Bound on waiting for the failover lock (default: 10000)
    #[serde(default = "default_lock_wait_timeout_ms")]
    pub lock_wait_timeout_ms: u64,

    /// Bound on the graceful catch-up wait (default: 30000)
    #[serde(default = "default_catch_up_timeout_ms")]
    pub catch_up_timeout_ms: u64,

    /// Bound on each takeover hook call (default: 5000)
    #[serde(default = "default_mutation_timeout_ms")]
    pub mutation_timeout_ms: u64,

    /// Re-attach the old primary as a replica of the new one (default: true)
    #[serde(default = "default_reattach_outgoing")]
    pub reattach_outgoing: bool,
}

fn default_lock_wait_timeout_ms() -> u64 {
    10_000
}
fn default_catch_up_timeout_ms() -> u64 {
    30_000
}
fn default_mutation_timeout_ms() -> u64 {
    5_000
}
fn default_reattach_outgoing() -> bool {
    true
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            mode: TakeoverMode::default(),
            lock_wait_timeout_ms: default_lock_wait_timeout_ms(),
            catch_up_timeout_ms: default_catch_up_timeout_ms(),
            mutation_timeout_ms: default_mutation_timeout_ms(),
            reattach_outgoing: default_reattach_outgoing(),
        }
    }
}

impl FailoverConfig {
    pub fn hostile() -> Self {
        Self {
            mode: TakeoverMode::Hostile,
            ..Default::default()
        }
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    pub fn catch_up_timeout(&self) -> Duration {
        Duration::from_millis(self.catch_up_timeout_ms)
    }

    pub fn mutation_timeout(&self) -> Duration {
        Duration::from_millis(self.mutation_timeout_ms)
    }

    pub fn validate(&self) -> FailoverResult<()> {
        if self.lock_wait_timeout_ms == 0 {
            return Err(FailoverError::Misconfigured("lock_wait_timeout_ms must be > 0".into()));
        }
        if self.mutation_timeout_ms == 0 {
            return Err(FailoverError::Misconfigured("mutation_timeout_ms must be > 0".into()));
        }
        if self.mode == TakeoverMode::Graceful && self.catch_up_timeout_ms == 0 {
            return Err(FailoverError::Misconfigured(
                "catch_up_timeout_ms must be > 0 in graceful mode".into(),
            ));
        }
        Ok(())
    }
}
