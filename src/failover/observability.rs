//! Failover Observability
//!
//! Every attempt emits a start event, the lock outcome, and a final
//! outcome event. Events are logged through `tracing` and collected so
//! callers can inspect the exact sequence of an attempt.
//!
//! The observer describes what happened; it never decides what happens.

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::state::Phase;

/// Failover lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverEvent {
    /// failover.started
    Started { target: String },

    /// failover.lock.acquired
    LockAcquired { owner: String },

    /// failover.lock.unavailable
    LockUnavailable { reason: String },

    /// failover.candidate.selected
    CandidateSelected { outgoing: String, candidate: String },

    /// failover.outgoing.prepared
    OutgoingPrepared { uid: String },

    /// failover.candidate.prepared
    CandidatePrepared { uid: String },

    /// failover.takeover.completed
    TakeoverCompleted { new_primary: String, outgoing: String },

    /// failover.children.migrated
    ChildrenMigrated {
        migrated: usize,
        skipped: usize,
        failed: usize,
    },

    /// failover.rollback.started
    RollbackStarted { phase: Phase, reason: String },

    /// failover.rollback.failed
    RollbackFailed { uid: String, error: String },

    /// failover.failed
    Failed { phase: Phase, error: String },

    /// failover.lock.released
    LockReleased,

    /// failover.lock.release_failed
    LockReleaseFailed { error: String },
}

impl FailoverEvent {
    /// Get the event name for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "failover.started",
            Self::LockAcquired { .. } => "failover.lock.acquired",
            Self::LockUnavailable { .. } => "failover.lock.unavailable",
            Self::CandidateSelected { .. } => "failover.candidate.selected",
            Self::OutgoingPrepared { .. } => "failover.outgoing.prepared",
            Self::CandidatePrepared { .. } => "failover.candidate.prepared",
            Self::TakeoverCompleted { .. } => "failover.takeover.completed",
            Self::ChildrenMigrated { .. } => "failover.children.migrated",
            Self::RollbackStarted { .. } => "failover.rollback.started",
            Self::RollbackFailed { .. } => "failover.rollback.failed",
            Self::Failed { .. } => "failover.failed",
            Self::LockReleased => "failover.lock.released",
            Self::LockReleaseFailed { .. } => "failover.lock.release_failed",
        }
    }

    fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::LockUnavailable { .. }
                | Self::RollbackStarted { .. }
                | Self::RollbackFailed { .. }
                | Self::Failed { .. }
                | Self::LockReleaseFailed { .. }
        )
    }
}

/// One emitted event, tagged with its attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverRecord {
    pub attempt: Uuid,
    pub event: FailoverEvent,
}

/// Collector for failover events, shared across attempts.
#[derive(Debug, Default)]
pub struct FailoverObserver {
    records: Mutex<Vec<FailoverRecord>>,
}

impl FailoverObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit an event.
    pub fn emit(&self, attempt: Uuid, event: FailoverEvent) {
        if event.is_warning() {
            warn!(
                attempt = %attempt,
                event = event.event_name(),
                details = ?event,
                "failover event"
            );
        } else {
            info!(
                attempt = %attempt,
                event = event.event_name(),
                details = ?event,
                "failover event"
            );
        }
        self.records.lock().push(FailoverRecord { attempt, event });
    }

    pub fn records(&self) -> Vec<FailoverRecord> {
        self.records.lock().clone()
    }

    /// Events of one attempt, in emission order.
    pub fn events_for(&self, attempt: Uuid) -> Vec<FailoverEvent> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.attempt == attempt)
            .map(|r| r.event.clone())
            .collect()
    }

    /// Event names of one attempt, in emission order.
    pub fn event_names(&self, attempt: Uuid) -> Vec<&'static str> {
        self.events_for(attempt)
            .iter()
            .map(FailoverEvent::event_name)
            .collect()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}
