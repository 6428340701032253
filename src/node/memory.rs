//! In-memory node backend
//!
//! `MemoryNode` is a scriptable `Failable` used by the simulator and the
//! tests. Every hook can be made to fail a given number of times, every
//! call is counted, and an optional `WritableLedger` tracks how many nodes
//! are writable at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::errors::{NodeError, NodeResult};
use super::failable::Failable;
use super::position::Position;
use crate::context::Context;

/// The backend operations a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    Position,
    PrepareForTakeover,
    PrepareToTakeover,
    CompleteTakeover,
    RevertTakeoverAttempt,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::Position => "position",
            Hook::PrepareForTakeover => "prepare_for_takeover",
            Hook::PrepareToTakeover => "prepare_to_takeover",
            Hook::CompleteTakeover => "complete_takeover",
            Hook::RevertTakeoverAttempt => "revert_takeover_attempt",
        }
    }
}

/// Shared counter of currently writable nodes, with a high-water mark.
#[derive(Debug, Default)]
pub struct WritableLedger {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl WritableLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously writable nodes ever observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn became_writable(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn became_read_only(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default)]
enum Fault {
    #[default]
    None,
    Times(usize),
    Always,
}

#[derive(Debug, Clone)]
struct Saved {
    writable: bool,
    accepting_writes: bool,
}

#[derive(Debug)]
struct State {
    position: Position,
    writable: bool,
    accepting_writes: bool,
    saved: Option<Saved>,
    completed: bool,
}

/// Scriptable in-memory replication member.
#[derive(Debug)]
pub struct MemoryNode {
    uid: String,
    state: Mutex<State>,
    faults: Mutex<HashMap<Hook, Fault>>,
    calls: Mutex<HashMap<Hook, usize>>,
    latency: Mutex<Option<Duration>>,
    ledger: Option<Arc<WritableLedger>>,
}

impl MemoryNode {
    pub fn new(uid: impl Into<String>, position: Position, writable: bool) -> Self {
        Self {
            uid: uid.into(),
            state: Mutex::new(State {
                position,
                writable,
                accepting_writes: writable,
                saved: None,
                completed: false,
            }),
            faults: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            ledger: None,
        }
    }

    /// Attach a ledger. A node created writable is counted immediately.
    pub fn with_ledger(mut self, ledger: Arc<WritableLedger>) -> Self {
        if self.state.get_mut().writable {
            ledger.became_writable();
        }
        self.ledger = Some(ledger);
        self
    }

    /// Delay every hook by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Fail the next `n` calls to `hook`.
    pub fn fail_next(&self, hook: Hook, n: usize) {
        self.faults.lock().insert(hook, Fault::Times(n));
    }

    /// Fail every call to `hook` until cleared.
    pub fn fail_always(&self, hook: Hook) {
        self.faults.lock().insert(hook, Fault::Always);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Number of times `hook` has been invoked, failed calls included.
    pub fn calls(&self, hook: Hook) -> usize {
        self.calls.lock().get(&hook).copied().unwrap_or(0)
    }

    pub fn total_takeover_calls(&self) -> usize {
        let calls = self.calls.lock();
        calls
            .iter()
            .filter(|(hook, _)| **hook != Hook::Position)
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn current_position(&self) -> Position {
        self.state.lock().position.clone()
    }

    pub fn set_position(&self, position: Position) {
        self.state.lock().position = position;
    }

    /// Apply `n` more replicated changes.
    pub fn advance(&self, n: u64) {
        let mut state = self.state.lock();
        state.position = state.position.advanced_by(n);
    }

    /// Replicate up to `target`.
    pub fn catch_up_to(&self, target: &Position) {
        self.state.lock().position = target.clone();
    }

    pub fn accepting_writes(&self) -> bool {
        self.state.lock().accepting_writes
    }

    async fn enter(&self, ctx: &Context, hook: Hook) -> NodeResult<()> {
        *self.calls.lock().entry(hook).or_insert(0) += 1;

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            ctx.run(tokio::time::sleep(latency)).await?;
        }

        let mut faults = self.faults.lock();
        let fault = faults.entry(hook).or_default();
        let fail = match *fault {
            Fault::None => false,
            Fault::Always => true,
            Fault::Times(0) => false,
            Fault::Times(n) => {
                *fault = Fault::Times(n - 1);
                true
            }
        };
        if fail {
            return Err(NodeError::unavailable(
                &self.uid,
                format!("injected fault in {}", hook.as_str()),
            ));
        }
        Ok(())
    }

    fn checkpoint(state: &mut State) {
        if state.saved.is_none() || state.completed {
            state.saved = Some(Saved {
                writable: state.writable,
                accepting_writes: state.accepting_writes,
            });
            state.completed = false;
        }
    }

    fn set_writable(&self, state: &mut State, writable: bool) {
        if state.writable == writable {
            return;
        }
        state.writable = writable;
        if let Some(ledger) = &self.ledger {
            if writable {
                ledger.became_writable();
            } else {
                ledger.became_read_only();
            }
        }
    }
}

#[async_trait]
impl Failable for MemoryNode {
    fn uid(&self) -> &str {
        &self.uid
    }

    async fn position(&self, ctx: &Context) -> NodeResult<Position> {
        self.enter(ctx, Hook::Position).await?;
        Ok(self.state.lock().position.clone())
    }

    fn writable(&self) -> bool {
        self.state.lock().writable
    }

    async fn prepare_for_takeover(&self, ctx: &Context) -> NodeResult<()> {
        self.enter(ctx, Hook::PrepareForTakeover).await?;
        let mut state = self.state.lock();
        Self::checkpoint(&mut state);
        state.accepting_writes = false;
        self.set_writable(&mut state, false);
        Ok(())
    }

    async fn prepare_to_takeover(
        &self,
        ctx: &Context,
        primary_position: &Position,
    ) -> NodeResult<()> {
        self.enter(ctx, Hook::PrepareToTakeover).await?;
        let mut state = self.state.lock();
        Self::checkpoint(&mut state);
        match state.position.compare(primary_position)? {
            std::cmp::Ordering::Less => Err(NodeError::not_ready(
                &self.uid,
                format!("at {} but primary is at {}", state.position, primary_position),
            )),
            _ => Ok(()),
        }
    }

    async fn complete_takeover(&self, ctx: &Context, is_writable: bool) -> NodeResult<()> {
        self.enter(ctx, Hook::CompleteTakeover).await?;
        let mut state = self.state.lock();
        Self::checkpoint(&mut state);
        state.accepting_writes = is_writable;
        self.set_writable(&mut state, is_writable);
        state.completed = true;
        Ok(())
    }

    async fn revert_takeover_attempt(&self, ctx: &Context) -> NodeResult<()> {
        self.enter(ctx, Hook::RevertTakeoverAttempt).await?;
        let mut state = self.state.lock();
        if let Some(saved) = state.saved.take() {
            state.accepting_writes = saved.accepting_writes;
            self.set_writable(&mut state, saved.writable);
        }
        state.completed = false;
        Ok(())
    }
}
