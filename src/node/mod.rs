//! Replication Tree Members
//!
//! This module provides the node abstraction the failover engine drives:
//! - Positions and their lineage-aware comparison
//! - The `Failable` capability set implemented by database backends
//! - The `Topology` registry that owns parent/child links
//! - An in-memory backend for simulation and tests
//!
//! # Invariants
//!
//! - A node appears in its parent's children iff its parent link points there
//! - Uids are unique within a topology and never reused
//! - Takeover hooks refuse to run unless the caller holds the failover lock

mod errors;
mod failable;
mod memory;
mod position;
mod topology;
mod uid;

pub use errors::{NodeError, NodeResult};
pub use failable::Failable;
pub use memory::{Hook, MemoryNode, WritableLedger};
pub use position::Position;
pub use topology::{Node, NodeId, NodeSnapshot, Topology, TopologySnapshot};
pub use uid::{RandomUids, SequentialUids, UidGenerator};
