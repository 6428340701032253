//! CLI-specific error types
//!
//! All CLI errors are fatal: `main` prints them and exits non-zero.

use std::io;

use thiserror::Error;

use crate::failover::FailoverError;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file missing, malformed or invalid
    #[error("{0}")]
    Config(String),

    /// Topology description missing, malformed or inconsistent
    #[error("{0}")]
    Topology(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The async runtime could not be started
    #[error("{0}")]
    Runtime(String),

    /// The simulated failover did not succeed
    #[error("{0}")]
    Failover(#[from] FailoverError),
}

impl CliError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn topology_error(msg: impl Into<String>) -> Self {
        Self::Topology(msg.into())
    }

    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "FAILOVER_CLI_CONFIG_ERROR",
            Self::Topology(_) => "FAILOVER_CLI_TOPOLOGY_ERROR",
            Self::Io(_) => "FAILOVER_CLI_IO_ERROR",
            Self::Json(_) => "FAILOVER_CLI_JSON_ERROR",
            Self::Runtime(_) => "FAILOVER_CLI_RUNTIME_ERROR",
            Self::Failover(_) => "FAILOVER_CLI_FAILOVER_FAILED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RulesError;

    #[test]
    fn test_codes() {
        assert_eq!(
            CliError::config_error("bad").code(),
            "FAILOVER_CLI_CONFIG_ERROR"
        );
        let err: CliError = FailoverError::from(RulesError::no_candidates("p")).into();
        assert_eq!(err.code(), "FAILOVER_CLI_FAILOVER_FAILED");
        assert_eq!(err.to_string(), "no suitable candidates under p");
    }
}
