//! Failover State Machine
//!
//! States are explicit and every transition consumes the previous state.
//! Illegal transitions return `ForbiddenTransition` instead of panicking.
//!
//! ```text
//! Idle -> SelectingCandidate -> PreparingOutgoing -> PreparingCandidate -> Completing -> Done
//!                                     |                    |                  |
//!                                     +------> RollingBack <------------------+
//!                                                   |
//!                                                   v
//! Idle / SelectingCandidate / PreparingOutgoing -> Failed
//! ```

use std::fmt;

use serde::Serialize;

use super::errors::{FailoverError, FailoverResult};

/// Where in the attempt a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Locking,
    Selecting,
    PreparingOutgoing,
    PreparingCandidate,
    Completing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Locking => "locking",
            Phase::Selecting => "selecting",
            Phase::PreparingOutgoing => "preparing_outgoing",
            Phase::PreparingCandidate => "preparing_candidate",
            Phase::Completing => "completing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one failover attempt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FailoverState {
    /// Nothing has happened yet; the lock is not held.
    #[default]
    Idle,

    /// Lock held, ranking candidates.
    SelectingCandidate,

    /// Demoting the outgoing primary.
    PreparingOutgoing { candidate: String },

    /// Checking the candidate is caught up and ready.
    PreparingCandidate { candidate: String },

    /// Flipping writability on both nodes.
    Completing { candidate: String },

    /// Takeover finished.
    Done { new_primary: String },

    /// Compensating after a failure in `phase`.
    RollingBack { candidate: String, phase: Phase },

    /// Terminal failure. A fresh attempt may be started.
    Failed {
        candidate: Option<String>,
        phase: Phase,
    },
}

impl FailoverState {
    pub fn new() -> Self {
        Self::Idle
    }

    /// Get the state name for observability.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::SelectingCandidate => "SelectingCandidate",
            Self::PreparingOutgoing { .. } => "PreparingOutgoing",
            Self::PreparingCandidate { .. } => "PreparingCandidate",
            Self::Completing { .. } => "Completing",
            Self::Done { .. } => "Done",
            Self::RollingBack { .. } => "RollingBack",
            Self::Failed { .. } => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed { .. })
    }

    /// The candidate involved, if one has been chosen.
    pub fn candidate(&self) -> Option<&str> {
        match self {
            Self::Idle | Self::SelectingCandidate => None,
            Self::PreparingOutgoing { candidate }
            | Self::PreparingCandidate { candidate }
            | Self::Completing { candidate }
            | Self::RollingBack { candidate, .. } => Some(candidate),
            Self::Done { new_primary } => Some(new_primary),
            Self::Failed { candidate, .. } => candidate.as_deref(),
        }
    }

    fn forbidden(self, to: &'static str) -> FailoverError {
        FailoverError::ForbiddenTransition {
            from: self.state_name(),
            to,
        }
    }

    /// Idle → SelectingCandidate, once the lock is held.
    pub fn begin_selection(self) -> FailoverResult<Self> {
        match self {
            Self::Idle => Ok(Self::SelectingCandidate),
            other => Err(other.forbidden("SelectingCandidate")),
        }
    }

    /// SelectingCandidate → PreparingOutgoing
    pub fn candidate_selected(self, candidate: impl Into<String>) -> FailoverResult<Self> {
        match self {
            Self::SelectingCandidate => Ok(Self::PreparingOutgoing {
                candidate: candidate.into(),
            }),
            other => Err(other.forbidden("PreparingOutgoing")),
        }
    }

    /// PreparingOutgoing → PreparingCandidate
    pub fn outgoing_prepared(self) -> FailoverResult<Self> {
        match self {
            Self::PreparingOutgoing { candidate } => Ok(Self::PreparingCandidate { candidate }),
            other => Err(other.forbidden("PreparingCandidate")),
        }
    }

    /// PreparingCandidate → Completing
    pub fn candidate_prepared(self) -> FailoverResult<Self> {
        match self {
            Self::PreparingCandidate { candidate } => Ok(Self::Completing { candidate }),
            other => Err(other.forbidden("Completing")),
        }
    }

    /// Completing → Done
    pub fn completed(self) -> FailoverResult<Self> {
        match self {
            Self::Completing { candidate } => Ok(Self::Done {
                new_primary: candidate,
            }),
            other => Err(other.forbidden("Done")),
        }
    }

    /// PreparingOutgoing / PreparingCandidate / Completing → RollingBack
    pub fn begin_rollback(self) -> FailoverResult<Self> {
        match self {
            Self::PreparingOutgoing { candidate } => Ok(Self::RollingBack {
                candidate,
                phase: Phase::PreparingOutgoing,
            }),
            Self::PreparingCandidate { candidate } => Ok(Self::RollingBack {
                candidate,
                phase: Phase::PreparingCandidate,
            }),
            Self::Completing { candidate } => Ok(Self::RollingBack {
                candidate,
                phase: Phase::Completing,
            }),
            other => Err(other.forbidden("RollingBack")),
        }
    }

    /// RollingBack → Failed
    pub fn rolled_back(self) -> FailoverResult<Self> {
        match self {
            Self::RollingBack { candidate, phase } => Ok(Self::Failed {
                candidate: Some(candidate),
                phase,
            }),
            other => Err(other.forbidden("Failed")),
        }
    }

    /// Fail without compensation. Only legal before any node was mutated.
    pub fn fail(self) -> FailoverResult<Self> {
        match self {
            Self::Idle => Ok(Self::Failed {
                candidate: None,
                phase: Phase::Locking,
            }),
            Self::SelectingCandidate => Ok(Self::Failed {
                candidate: None,
                phase: Phase::Selecting,
            }),
            Self::PreparingOutgoing { candidate } => Ok(Self::Failed {
                candidate: Some(candidate),
                phase: Phase::PreparingOutgoing,
            }),
            other => Err(other.forbidden("Failed")),
        }
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.candidate() {
            Some(candidate) => write!(f, "{}({})", self.state_name(), candidate),
            None => f.write_str(self.state_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completing() -> FailoverState {
        FailoverState::new()
            .begin_selection()
            .unwrap()
            .candidate_selected("b")
            .unwrap()
            .outgoing_prepared()
            .unwrap()
            .candidate_prepared()
            .unwrap()
    }

    #[test]
    fn test_happy_path() {
        let state = completing().completed().unwrap();
        assert_eq!(
            state,
            FailoverState::Done {
                new_primary: "b".into()
            }
        );
        assert!(state.is_terminal());
    }

    #[test]
    fn test_rollback_from_completing() {
        let state = completing().begin_rollback().unwrap();
        assert_eq!(state.state_name(), "RollingBack");

        let state = state.rolled_back().unwrap();
        assert_eq!(
            state,
            FailoverState::Failed {
                candidate: Some("b".into()),
                phase: Phase::Completing,
            }
        );
    }

    #[test]
    fn test_fail_before_mutation() {
        let failed = FailoverState::Idle.fail().unwrap();
        assert_eq!(
            failed,
            FailoverState::Failed {
                candidate: None,
                phase: Phase::Locking
            }
        );

        let failed = FailoverState::SelectingCandidate.fail().unwrap();
        assert!(matches!(failed, FailoverState::Failed { phase: Phase::Selecting, .. }));
    }

    #[test]
    fn test_mutated_states_cannot_fail_without_rollback() {
        let state = completing();
        match state.fail() {
            Err(FailoverError::ForbiddenTransition { from, to }) => {
                assert_eq!(from, "Completing");
                assert_eq!(to, "Failed");
            }
            other => panic!("expected ForbiddenTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_forbidden_transitions() {
        assert!(FailoverState::Idle.completed().is_err());
        assert!(FailoverState::Idle.candidate_selected("x").is_err());
        assert!(FailoverState::SelectingCandidate.begin_rollback().is_err());
        assert!(completing().completed().unwrap().begin_selection().is_err());
    }

    #[test]
    fn test_display_includes_candidate() {
        assert_eq!(completing().to_string(), "Completing(b)");
        assert_eq!(FailoverState::Idle.to_string(), "Idle");
    }

    #[test]
    fn test_serializes_with_tag() {
        let json = serde_json::to_value(completing()).unwrap();
        assert_eq!(json["state"], "completing");
        assert_eq!(json["candidate"], "b");
    }
}
