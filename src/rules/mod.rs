//! Candidate Rules
//!
//! Decides which replicas are healthy, waits for a replica to catch up,
//! and ranks promotion candidates. Ranking is deterministic: the most
//! advanced position wins and ties go to the lowest uid.

mod config;
mod errors;
mod service;

pub use config::RulesConfig;
pub use errors::{RulesError, RulesResult};
pub use service::{ReplicationRules, RuleService};
