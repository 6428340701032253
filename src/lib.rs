//! failover - lock-guarded failover coordination for tree-shaped
//! replication topologies
//!
//! A failover promotes one replica of the current primary, demotes the
//! primary, and re-parents the remaining replicas under the new primary.
//! Attempts are serialized by a lease lock and driven through an explicit
//! state machine with compensating rollback.

pub mod cli;
pub mod context;
pub mod failover;
pub mod lock;
pub mod node;
pub mod rules;
