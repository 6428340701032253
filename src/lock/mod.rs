//! Failover Lock
//!
//! Leasehold mutual exclusion for one failover domain. Exactly one
//! coordinator holds the lease at a time; a coordinator that dies without
//! releasing loses it when the lease expires.
//!
//! # Design
//!
//! - `LockService` is the contract the failover engine depends on
//! - `LeaseLock` implements it over any `LockBackend`
//! - `MemoryLockBackend` arbitrates leases inside one process

mod backend;
mod config;
mod errors;
mod lease;
mod service;

pub use backend::{LeaseInfo, LeaseState, LockBackend, MemoryLockBackend};
pub use config::LockConfig;
pub use errors::{LockError, LockResult};
pub use lease::LeaseLock;
pub use service::{LockAcquired, LockService};
