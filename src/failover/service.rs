//! Failover Service
//!
//! Drives one attempt through the state machine:
//!
//! 1. acquire the failover lock (bounded wait); failure touches no node
//! 2. rank candidates under the outgoing primary
//! 3. demote the outgoing primary
//! 4. verify the candidate is caught up and ready
//! 5. promote the candidate, then finalize the outgoing primary
//! 6. migrate the remaining children and release the lock
//!
//! Caller cancellation is honored only at checkpoints between steps. Takeover
//! hooks run under a detached context bounded by `mutation_timeout`, so a
//! flip is never interrupted half-way. The lock is released on every exit
//! path, including when the attempt future is dropped.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::{FailoverConfig, TakeoverMode};
use super::errors::{FailoverError, FailoverResult};
use super::migration::{migrate_children, MigrationFailure, MigrationReport};
use super::observability::{FailoverEvent, FailoverObserver};
use super::report::{FailoverReport, RollbackFailure};
use super::state::{FailoverState, Phase};
use crate::context::Context;
use crate::lock::{LockResult, LockService};
use crate::node::{Node, NodeError, Position, Topology};
use crate::rules::RuleService;

/// What an attempt fails over.
enum Target<'a> {
    Parent {
        parent: &'a Node,
        child: Option<&'a Node>,
    },
    Topology(&'a Arc<Topology>),
}

impl Target<'_> {
    fn describe(&self) -> String {
        match self {
            Target::Parent { parent, .. } => format!("node {}", parent.uid()),
            Target::Topology(topology) => format!("topology {}", topology.name()),
        }
    }
}

/// Releases the lock when dropped before an explicit release.
struct LockGuard {
    lock: Option<Arc<dyn LockService>>,
}

impl LockGuard {
    fn new(lock: Arc<dyn LockService>) -> Self {
        Self { lock: Some(lock) }
    }

    async fn release(mut self) -> LockResult<()> {
        match self.lock.take() {
            Some(lock) => lock.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(owner = %lock.owner(), "failover attempt dropped, releasing lock");
                handle.spawn(async move {
                    if let Err(e) = lock.release().await {
                        warn!(error = %e, "release after dropped attempt failed");
                    }
                });
            }
            Err(_) => {
                warn!(owner = %lock.owner(), "no runtime to release lock, lease will expire");
            }
        }
    }
}

/// Bookkeeping for one attempt.
struct Attempt {
    id: Uuid,
    state: FailoverState,
    outgoing: Option<Node>,
    candidate: Option<Node>,
    rollback_errors: Vec<RollbackFailure>,
    migration: Option<MigrationReport>,
}

impl Attempt {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: FailoverState::new(),
            outgoing: None,
            candidate: None,
            rollback_errors: Vec::new(),
            migration: None,
        }
    }

    fn advance(
        &mut self,
        transition: impl FnOnce(FailoverState) -> FailoverResult<FailoverState>,
    ) -> FailoverResult<()> {
        let next = transition(self.state.clone())?;
        debug!(attempt = %self.id, from = %self.state, to = %next, "failover transition");
        self.state = next;
        Ok(())
    }
}

/// Orchestrates failover attempts for one domain.
#[derive(Debug)]
pub struct FailoverService {
    lock: Arc<dyn LockService>,
    rules: Arc<dyn RuleService>,
    config: FailoverConfig,
    observer: Arc<FailoverObserver>,
}

impl FailoverService {
    pub fn new(
        lock: Arc<dyn LockService>,
        rules: Arc<dyn RuleService>,
        config: FailoverConfig,
    ) -> Self {
        Self {
            lock,
            rules,
            config,
            observer: Arc::new(FailoverObserver::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<FailoverObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn observer(&self) -> &Arc<FailoverObserver> {
        &self.observer
    }

    pub fn lock(&self) -> &Arc<dyn LockService> {
        &self.lock
    }

    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Fail over from `parent` to `child`, or to the best candidate.
    pub async fn graceful_failover(
        &self,
        ctx: &Context,
        parent: &Node,
        child: Option<&Node>,
    ) -> FailoverReport {
        self.run(ctx, Target::Parent { parent, child }).await
    }

    /// Fail over the current primary of `topology`.
    pub async fn failover(&self, ctx: &Context, topology: &Arc<Topology>) -> FailoverReport {
        self.run(ctx, Target::Topology(topology)).await
    }

    async fn run(&self, ctx: &Context, target: Target<'_>) -> FailoverReport {
        let started_at = Utc::now();
        let started = Instant::now();
        let mut attempt = Attempt::new();
        self.emit(&attempt, FailoverEvent::Started {
            target: target.describe(),
        });

        let (error, lock_release_error) = match self.locked(ctx, &target, &mut attempt).await {
            Ok(release) => (None, release.err()),
            Err((error, release)) => (Some(error), release.and_then(Result::err)),
        };

        if let Some(err) = &error {
            if !attempt.state.is_terminal() {
                if let Err(e) = attempt.advance(FailoverState::fail) {
                    warn!(attempt = %attempt.id, error = %e, "could not record failure");
                }
            }
            let phase = match &attempt.state {
                FailoverState::Failed { phase, .. } => *phase,
                _ => Phase::Locking,
            };
            self.emit(&attempt, FailoverEvent::Failed {
                phase,
                error: err.to_string(),
            });
        }

        FailoverReport {
            attempt_id: attempt.id,
            state: attempt.state,
            outgoing: attempt.outgoing.map(|n| n.uid().to_string()),
            candidate: attempt.candidate.map(|n| n.uid().to_string()),
            error,
            rollback_errors: attempt.rollback_errors,
            migration: attempt.migration,
            lock_release_error,
            started_at,
            duration: started.elapsed(),
        }
    }

    /// Acquire, drive, release. The release outcome is `None` when the lock
    /// was never acquired.
    async fn locked(
        &self,
        ctx: &Context,
        target: &Target<'_>,
        attempt: &mut Attempt,
    ) -> Result<LockResult<()>, (FailoverError, Option<LockResult<()>>)> {
        let lock_ctx = ctx.with_timeout(self.config.lock_wait_timeout());
        if let Err(e) = self.lock.acquire(&lock_ctx).await {
            self.emit(attempt, FailoverEvent::LockUnavailable {
                reason: e.to_string(),
            });
            return Err((FailoverError::FailoverInProgress(e), None));
        }
        let guard = LockGuard::new(Arc::clone(&self.lock));
        self.emit(attempt, FailoverEvent::LockAcquired {
            owner: self.lock.owner().to_string(),
        });

        let outcome = self.drive(ctx, target, attempt).await;

        let release = guard.release().await;
        match &release {
            Ok(()) => self.emit(attempt, FailoverEvent::LockReleased),
            Err(e) => self.emit(attempt, FailoverEvent::LockReleaseFailed {
                error: e.to_string(),
            }),
        }

        match outcome {
            Ok(()) => Ok(release),
            Err(e) => Err((e, Some(release))),
        }
    }

    async fn drive(
        &self,
        ctx: &Context,
        target: &Target<'_>,
        attempt: &mut Attempt,
    ) -> FailoverResult<()> {
        attempt.advance(FailoverState::begin_selection)?;
        checkpoint(ctx)?;

        // SelectingCandidate
        let parent = match target {
            Target::Parent { parent, .. } => verify_primary(parent)?,
            Target::Topology(topology) => resolve_primary(topology)?,
        };
        attempt.outgoing = Some(parent.clone());

        let candidate = match target {
            Target::Parent {
                child: Some(child), ..
            } => {
                if child.parent().as_ref() != Some(&parent) {
                    return Err(FailoverError::NotAChild {
                        child: child.uid().to_string(),
                        parent: parent.uid().to_string(),
                    });
                }
                (*child).clone()
            }
            _ => self.rules.best_candidate(ctx, &parent).await?,
        };
        attempt.candidate = Some(candidate.clone());
        attempt.advance(|s| s.candidate_selected(candidate.uid()))?;
        self.emit(attempt, FailoverEvent::CandidateSelected {
            outgoing: parent.uid().to_string(),
            candidate: candidate.uid().to_string(),
        });
        checkpoint(ctx)?;

        // PreparingOutgoing
        let lock = self.lock.as_ref();
        parent
            .prepare_for_takeover(&self.mutation_ctx(), lock)
            .await
            .map_err(|e| {
                FailoverError::takeover_failed(Phase::PreparingOutgoing, parent.uid(), e)
            })?;
        attempt.advance(FailoverState::outgoing_prepared)?;
        self.emit(attempt, FailoverEvent::OutgoingPrepared {
            uid: parent.uid().to_string(),
        });

        // PreparingCandidate
        if let Err(e) = self.prepare_candidate(ctx, &parent, &candidate).await {
            return Err(self.roll_back(attempt, &[&parent], e).await);
        }
        attempt.advance(FailoverState::candidate_prepared)?;
        self.emit(attempt, FailoverEvent::CandidatePrepared {
            uid: candidate.uid().to_string(),
        });
        if let Err(e) = checkpoint(ctx) {
            return Err(self.roll_back(attempt, &[&parent], e).await);
        }

        // Completing: no checkpoint between the two flips
        if let Err(e) = candidate.complete_takeover(&self.mutation_ctx(), lock, true).await {
            let err = FailoverError::takeover_failed(Phase::Completing, candidate.uid(), e);
            return Err(self.roll_back(attempt, &[&candidate, &parent], err).await);
        }
        if let Err(e) = parent.complete_takeover(&self.mutation_ctx(), lock, false).await {
            let err = FailoverError::takeover_failed(Phase::Completing, parent.uid(), e);
            return Err(self.roll_back(attempt, &[&candidate, &parent], err).await);
        }
        attempt.advance(FailoverState::completed)?;
        self.emit(attempt, FailoverEvent::TakeoverCompleted {
            new_primary: candidate.uid().to_string(),
            outgoing: parent.uid().to_string(),
        });
        info!(new_primary = %candidate.uid(), outgoing = %parent.uid(), "takeover completed");

        // Done: reshape the tree while still holding the lock
        candidate.detach()?;
        let mut migration = migrate_children(&parent, &candidate);
        if self.config.reattach_outgoing {
            match parent.set_parent(&candidate) {
                Ok(()) => migration.migrated.push(parent.uid().to_string()),
                Err(error) => {
                    warn!(
                        outgoing = %parent.uid(),
                        error = %error,
                        "could not reattach outgoing primary"
                    );
                    migration.failed.push(MigrationFailure {
                        uid: parent.uid().to_string(),
                        error,
                    });
                }
            }
        }
        self.emit(attempt, FailoverEvent::ChildrenMigrated {
            migrated: migration.migrated.len(),
            skipped: migration.skipped.len(),
            failed: migration.failed.len(),
        });
        attempt.migration = Some(migration);
        Ok(())
    }

    /// Catch-up wait (graceful only) and readiness check.
    async fn prepare_candidate(
        &self,
        ctx: &Context,
        parent: &Node,
        candidate: &Node,
    ) -> FailoverResult<()> {
        checkpoint(ctx)?;

        if self.config.mode == TakeoverMode::Graceful {
            let wait_ctx = ctx.with_timeout(self.config.catch_up_timeout());
            if let Err(e) = self.rules.wait_for_node_to_be_healthy(&wait_ctx, candidate).await {
                return Err(match ctx.err() {
                    Some(cancelled) => FailoverError::Cancelled(cancelled),
                    None => e.into(),
                });
            }
        }

        let primary_position = self.primary_position(parent, candidate).await?;
        debug!(candidate = %candidate.uid(), position = %primary_position, "verifying candidate");

        candidate
            .prepare_to_takeover(&self.mutation_ctx(), self.lock.as_ref(), &primary_position)
            .await
            .map_err(|e| {
                FailoverError::takeover_failed(Phase::PreparingCandidate, candidate.uid(), e)
            })
    }

    /// Final position of the outgoing primary, frozen by step 3.
    async fn primary_position(&self, parent: &Node, candidate: &Node) -> FailoverResult<Position> {
        let fetched = parent.position(&self.mutation_ctx()).await;
        match (fetched, self.config.mode) {
            (Ok(position), _) => Ok(position),
            (Err(e), TakeoverMode::Graceful) => Err(FailoverError::takeover_failed(
                Phase::PreparingCandidate,
                parent.uid(),
                e,
            )),
            (Err(e), TakeoverMode::Hostile) => {
                warn!(
                    outgoing = %parent.uid(),
                    error = %e,
                    "primary position unreadable, using fallback"
                );
                match parent.last_known_position() {
                    Some(position) => Ok(position),
                    None => {
                        let fetched = candidate.position(&self.mutation_ctx()).await;
                        fetched.map_err(|e| {
                            let uid = candidate.uid();
                            FailoverError::takeover_failed(Phase::PreparingCandidate, uid, e)
                        })
                    }
                }
            }
        }
    }

    /// Revert `nodes` in order, record failures, and land in `Failed`.
    ///
    /// The candidate comes first so that at most one node is writable while
    /// compensating. If the candidate stays writable, the outgoing primary is
    /// left demoted.
    async fn roll_back(
        &self,
        attempt: &mut Attempt,
        nodes: &[&Node],
        error: FailoverError,
    ) -> FailoverError {
        let phase = match &attempt.state {
            FailoverState::PreparingCandidate { .. } => Phase::PreparingCandidate,
            FailoverState::Completing { .. } => Phase::Completing,
            _ => Phase::PreparingOutgoing,
        };
        if let Err(e) = attempt.advance(FailoverState::begin_rollback) {
            warn!(attempt = %attempt.id, error = %e, "rollback started from unexpected state");
        }
        self.emit(attempt, FailoverEvent::RollbackStarted {
            phase,
            reason: error.to_string(),
        });

        let lock = self.lock.as_ref();
        let mut still_writable: Option<String> = None;
        for node in nodes {
            if let Some(other) = &still_writable {
                let failure = NodeError::unavailable(
                    node.uid(),
                    format!("revert skipped: {} is still writable", other),
                );
                self.record_rollback_failure(attempt, node, failure);
                continue;
            }

            match node.revert_takeover_attempt(&self.mutation_ctx(), lock).await {
                Ok(()) => debug!(node = %node.uid(), "takeover attempt reverted"),
                Err(e) => self.record_rollback_failure(attempt, node, e),
            }
            let is_outgoing = attempt.outgoing.as_ref() == Some(*node);
            if !is_outgoing && node.writable() {
                still_writable = Some(node.uid().to_string());
            }
        }

        if let Err(e) = attempt.advance(FailoverState::rolled_back) {
            warn!(attempt = %attempt.id, error = %e, "could not finish rollback");
        }
        error
    }

    fn record_rollback_failure(&self, attempt: &mut Attempt, node: &Node, error: NodeError) {
        warn!(
            node = %node.uid(),
            error = %error,
            "rollback failed, topology degraded and may need manual intervention"
        );
        self.emit(attempt, FailoverEvent::RollbackFailed {
            uid: node.uid().to_string(),
            error: error.to_string(),
        });
        attempt.rollback_errors.push(RollbackFailure {
            uid: node.uid().to_string(),
            error,
        });
    }

    fn mutation_ctx(&self) -> Context {
        Context::background().with_timeout(self.config.mutation_timeout())
    }

    fn emit(&self, attempt: &Attempt, event: FailoverEvent) {
        self.observer.emit(attempt.id, event);
    }
}

fn checkpoint(ctx: &Context) -> FailoverResult<()> {
    match ctx.err() {
        Some(err) => Err(FailoverError::Cancelled(err)),
        None => Ok(()),
    }
}

/// `parent` must be the writable root and the only writable node.
fn verify_primary(parent: &Node) -> FailoverResult<Node> {
    if parent.parent().is_some() || !parent.writable() {
        return Err(FailoverError::NotPrimary {
            uid: parent.uid().to_string(),
        });
    }
    let writable = parent.topology().writable_nodes();
    if writable.iter().any(|n| n != parent) {
        return Err(FailoverError::SplitBrain {
            uids: writable.iter().map(|n| n.uid().to_string()).collect(),
        });
    }
    Ok(parent.clone())
}

/// The single writable root of `topology`.
fn resolve_primary(topology: &Arc<Topology>) -> FailoverResult<Node> {
    let mut writable = topology.writable_nodes();
    if writable.len() > 1 {
        return Err(FailoverError::SplitBrain {
            uids: writable.iter().map(|n| n.uid().to_string()).collect(),
        });
    }
    match writable.pop() {
        Some(primary) if primary.parent().is_none() => Ok(primary),
        _ => Err(FailoverError::NoPrimary {
            topology: topology.name().to_string(),
        }),
    }
}
