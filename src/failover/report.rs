//! Attempt reports
//!
//! The entry points return a `FailoverReport` instead of a bare `Result`:
//! the first error is primary, rollback and release failures ride along
//! as secondary diagnostics.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::errors::{ErrorClass, FailoverError, FailoverResult};
use super::migration::{MigrationReport, MigrationSummary};
use super::state::FailoverState;
use crate::lock::LockError;
use crate::node::NodeError;

/// A compensating action that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    pub uid: String,
    pub error: NodeError,
}

/// Structured outcome of one failover attempt.
#[derive(Debug, Clone)]
pub struct FailoverReport {
    pub attempt_id: Uuid,
    pub state: FailoverState,
    pub outgoing: Option<String>,
    pub candidate: Option<String>,
    pub error: Option<FailoverError>,
    pub rollback_errors: Vec<RollbackFailure>,
    pub migration: Option<MigrationReport>,
    pub lock_release_error: Option<LockError>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl FailoverReport {
    pub fn is_success(&self) -> bool {
        matches!(self.state, FailoverState::Done { .. }) && self.error.is_none()
    }

    /// The topology may need manual attention even if the attempt finished.
    pub fn is_degraded(&self) -> bool {
        !self.rollback_errors.is_empty()
            || self.lock_release_error.is_some()
            || self.migration.as_ref().map_or(false, |m| !m.is_complete())
    }

    pub fn new_primary(&self) -> Option<&str> {
        match &self.state {
            FailoverState::Done { new_primary } => Some(new_primary),
            _ => None,
        }
    }

    /// Collapse into the new primary's uid or the first error.
    pub fn into_result(self) -> FailoverResult<String> {
        if let Some(err) = self.error {
            return Err(err);
        }
        match self.state {
            FailoverState::Done { new_primary } => Ok(new_primary),
            other => Err(FailoverError::ForbiddenTransition {
                from: other.state_name(),
                to: "Done",
            }),
        }
    }

    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            attempt_id: self.attempt_id.to_string(),
            state: self.state.clone(),
            outgoing: self.outgoing.clone(),
            candidate: self.candidate.clone(),
            error: self.error.as_ref().map(ToString::to_string),
            error_class: self.error.as_ref().map(FailoverError::class),
            retryable: self.error.as_ref().map_or(false, FailoverError::is_retryable),
            rollback_errors: self
                .rollback_errors
                .iter()
                .map(|f| (f.uid.clone(), f.error.to_string()))
                .collect(),
            migration: self.migration.as_ref().map(MigrationReport::summary),
            lock_release_error: self.lock_release_error.as_ref().map(ToString::to_string),
            degraded: self.is_degraded(),
            started_at: self.started_at,
            duration_ms: self.duration.as_millis() as u64,
        }
    }
}

/// Serializable view of a `FailoverReport`.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub attempt_id: String,
    pub state: FailoverState,
    pub outgoing: Option<String>,
    pub candidate: Option<String>,
    pub error: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub retryable: bool,
    pub rollback_errors: Vec<(String, String)>,
    pub migration: Option<MigrationSummary>,
    pub lock_release_error: Option<String>,
    pub degraded: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}
