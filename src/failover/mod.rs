//! Failover Engine
//!
//! Coordinates the promotion of a replica to primary:
//! - `FailoverState` is the explicit attempt state machine
//! - `FailoverService` drives it under the failover lock
//! - `migrate_children` re-parents surviving replicas
//! - `FailoverReport` carries the outcome and secondary diagnostics
//!
//! # Safety
//!
//! At most one node is writable at any instant. The outgoing primary is
//! demoted before the candidate is promoted, every flip happens while the
//! lock is held, and compensation reverts the candidate before the
//! outgoing primary.

mod config;
mod errors;
mod migration;
mod observability;
mod report;
mod service;
mod state;

pub use config::{FailoverConfig, TakeoverMode};
pub use errors::{ErrorClass, FailoverError, FailoverResult};
pub use migration::{migrate_children, MigrationFailure, MigrationReport, MigrationSummary};
pub use observability::{FailoverEvent, FailoverObserver, FailoverRecord};
pub use report::{FailoverReport, ReportSummary, RollbackFailure};
pub use service::FailoverService;
pub use state::{FailoverState, Phase};
