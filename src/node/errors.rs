//! Node Error Types
//!
//! Precondition violations (`IncomparablePosition`, `AlreadyChild`,
//! `WouldCreateCycle`) are caller errors and are never retried. Backend
//! failures are transient from the caller's point of view.

use thiserror::Error;

use crate::context::ContextError;

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;

/// Errors raised by nodes, their backends and the topology registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    /// Positions from different lineages were compared.
    #[error("cannot compare position of lineage '{left}' with lineage '{right}'")]
    IncomparablePosition { left: String, right: String },

    /// The node is already registered under the requested parent.
    #[error("node {child} is already a child of {parent}")]
    AlreadyChild { child: String, parent: String },

    /// The requested parent is the node itself or one of its descendants.
    #[error("making {parent} the parent of {child} would create a cycle")]
    WouldCreateCycle { child: String, parent: String },

    /// A node with this uid is already registered.
    #[error("duplicate node uid: {0}")]
    DuplicateUid(String),

    /// The node is not part of this topology.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// The candidate is not ready to take over.
    #[error("candidate {uid} is not ready: {reason}")]
    CandidateNotReady { uid: String, reason: String },

    /// A takeover hook was called without holding the failover lock.
    #[error("{operation} on {uid} refused: failover lock not held")]
    LockNotHeld { uid: String, operation: &'static str },

    /// The backend could not be reached or refused the operation.
    #[error("node {uid} unavailable: {reason}")]
    Unavailable { uid: String, reason: String },

    /// The operation's context ended first.
    #[error("node operation aborted: {0}")]
    Aborted(#[from] ContextError),
}

impl NodeError {
    /// Create an unavailable error.
    pub fn unavailable(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            uid: uid.into(),
            reason: reason.into(),
        }
    }

    /// Create a candidate-not-ready error.
    pub fn not_ready(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CandidateNotReady {
            uid: uid.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is a caller/programmer error.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(
            self,
            Self::IncomparablePosition { .. }
                | Self::AlreadyChild { .. }
                | Self::WouldCreateCycle { .. }
                | Self::DuplicateUid(_)
                | Self::UnknownNode(_)
                | Self::LockNotHeld { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        let err = NodeError::IncomparablePosition {
            left: "a".into(),
            right: "b".into(),
        };
        assert!(err.is_precondition_violation());
        assert!(NodeError::DuplicateUid("n1".into()).is_precondition_violation());

        assert!(!NodeError::unavailable("n1", "timeout").is_precondition_violation());
        assert!(!NodeError::not_ready("n1", "behind").is_precondition_violation());
        assert!(!NodeError::Aborted(ContextError::Cancelled).is_precondition_violation());
    }

    #[test]
    fn test_display() {
        let err = NodeError::AlreadyChild {
            child: "2".into(),
            parent: "1".into(),
        };
        assert_eq!(err.to_string(), "node 2 is already a child of 1");
    }
}
