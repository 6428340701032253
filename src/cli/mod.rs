//! Command-line interface
//!
//! - simulate: run one failover against an in-memory topology
//! - check-config: validate a configuration file

mod args;
mod commands;
mod config;
mod errors;

pub use args::{Cli, Command};
pub use commands::{check_config, run, run_command, simulate};
pub use config::{Config, FaultDef, NodeDef, SimulatedTopology, TopologyFile};
pub use errors::{CliError, CliResult};
