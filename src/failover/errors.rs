//! Failover Error Types
//!
//! Every error maps onto one of four classes:
//! - `Precondition`: caller or programmer error, never retried
//! - `Transient`: safe to retry the whole attempt after backoff
//! - `NoCandidate`: surfaced to the operator, needs a topology change
//! - `Mutation`: takeover flip failed and was rolled back

use serde::Serialize;
use thiserror::Error;

use super::state::Phase;
use crate::context::ContextError;
use crate::lock::LockError;
use crate::node::NodeError;
use crate::rules::RulesError;

/// Result type for failover operations
pub type FailoverResult<T> = Result<T, FailoverError>;

/// Error taxonomy for operators and retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Precondition,
    Transient,
    NoCandidate,
    Mutation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailoverError {
    /// Another coordinator holds the lock, or the lock backend is unreachable.
    #[error("failover already in progress: {0}")]
    FailoverInProgress(#[source] LockError),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error(transparent)]
    Node(#[from] NodeError),

    /// The caller's context ended at a checkpoint.
    #[error("failover cancelled: {0}")]
    Cancelled(ContextError),

    /// The topology has no writable root.
    #[error("topology {topology} has no writable primary")]
    NoPrimary { topology: String },

    /// The node asked to hand over is not the writable root.
    #[error("{uid} is not the writable primary")]
    NotPrimary { uid: String },

    /// More than one node reports writable.
    #[error("multiple writable nodes: {}", uids.join(", "))]
    SplitBrain { uids: Vec<String> },

    /// An explicitly requested candidate is not a direct child of the primary.
    #[error("{child} is not a child of {parent}")]
    NotAChild { child: String, parent: String },

    #[error("invalid failover configuration: {0}")]
    Misconfigured(String),

    #[error("forbidden transition: {from} -> {to}")]
    ForbiddenTransition {
        from: &'static str,
        to: &'static str,
    },

    /// A takeover hook failed.
    #[error("{phase} failed on {uid}: {source}")]
    TakeoverFailed {
        phase: Phase,
        uid: String,
        #[source]
        source: NodeError,
    },
}

impl FailoverError {
    pub fn takeover_failed(phase: Phase, uid: impl Into<String>, source: NodeError) -> Self {
        Self::TakeoverFailed {
            phase,
            uid: uid.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::FailoverInProgress(_) | Self::Cancelled(_) => ErrorClass::Transient,
            Self::Rules(RulesError::NoSuitableCandidates { .. }) => ErrorClass::NoCandidate,
            Self::Rules(RulesError::NodeIsBehind { .. }) => ErrorClass::Transient,
            Self::Rules(RulesError::Node(e)) | Self::Node(e) => node_class(e),
            Self::Rules(RulesError::Orphaned { .. } | RulesError::Misconfigured(_)) => {
                ErrorClass::Precondition
            }
            Self::NoPrimary { .. }
            | Self::NotPrimary { .. }
            | Self::SplitBrain { .. }
            | Self::NotAChild { .. }
            | Self::Misconfigured(_)
            | Self::ForbiddenTransition { .. } => ErrorClass::Precondition,
            Self::TakeoverFailed {
                phase: Phase::Completing,
                ..
            } => ErrorClass::Mutation,
            Self::TakeoverFailed { source, .. } => node_class(source),
        }
    }

    /// Whether a fresh attempt may be started automatically.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

fn node_class(err: &NodeError) -> ErrorClass {
    if err.is_precondition_violation() {
        ErrorClass::Precondition
    } else {
        ErrorClass::Transient
    }
}
