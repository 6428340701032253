//! Backend capability set
//!
//! A `Failable` is the engine-specific half of a replication-tree member:
//! it knows its own position and writability and how to drive its own
//! takeover lifecycle. Topology links live in the `Topology` registry, not
//! in the backend.

use std::fmt;

use async_trait::async_trait;

use super::errors::NodeResult;
use super::position::Position;
use crate::context::Context;

/// Capability set every replication-tree member implements.
///
/// Takeover hooks are called only by the failover engine, and only while
/// it holds the failover lock.
#[async_trait]
pub trait Failable: Send + Sync + fmt::Debug {
    /// Stable identity, unique for the lifetime of the topology.
    fn uid(&self) -> &str;

    /// Current replication marker. May require a round-trip to the database.
    async fn position(&self, ctx: &Context) -> NodeResult<Position>;

    /// Current promotion status.
    fn writable(&self) -> bool;

    /// Outgoing primary: stop accepting writes, flush in-flight state and
    /// drop `writable`. Must be safe to retry.
    async fn prepare_for_takeover(&self, ctx: &Context) -> NodeResult<()>;

    /// Candidate: verify local readiness without flipping state. Fails with
    /// `CandidateNotReady` if the node has not reached `primary_position`.
    async fn prepare_to_takeover(&self, ctx: &Context, primary_position: &Position)
        -> NodeResult<()>;

    /// Final flip of the `writable` flag. The only path that sets it to true.
    async fn complete_takeover(&self, ctx: &Context, is_writable: bool) -> NodeResult<()>;

    /// Restore the pre-attempt state, best effort.
    async fn revert_takeover_attempt(&self, ctx: &Context) -> NodeResult<()>;
}
