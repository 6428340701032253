//! Rules Error Types

use thiserror::Error;

use crate::node::NodeError;

/// Result type for rule evaluation
pub type RulesResult<T> = Result<T, RulesError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RulesError {
    /// The node did not catch up with its parent before the context ended.
    #[error("node {uid} is behind its parent")]
    NodeIsBehind { uid: String },

    /// No child of `parent` qualifies for promotion.
    #[error("no suitable candidates under {parent}")]
    NoSuitableCandidates { parent: String },

    /// A replica has no parent to catch up with.
    #[error("node {uid} has no parent")]
    Orphaned { uid: String },

    #[error("invalid rules configuration: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl RulesError {
    pub fn no_candidates(parent: impl Into<String>) -> Self {
        Self::NoSuitableCandidates {
            parent: parent.into(),
        }
    }
}
