//! CLI argument definitions using clap
//!
//! Commands:
//! - failover simulate --topology <path> [--config <path>] [--candidate <uid>] [--hostile]
//! - failover check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Failover coordinator for tree-shaped replication topologies
#[derive(Parser, Debug)]
#[command(name = "failover")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log at DEBUG level
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one failover against an in-memory topology and print the report
    Simulate {
        /// Path to the topology description
        #[arg(long)]
        topology: PathBuf,

        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Promote this child of the primary instead of the best candidate
        #[arg(long)]
        candidate: Option<String>,

        /// Skip the catch-up wait
        #[arg(long)]
        hostile: bool,
    },

    /// Load and validate a configuration file
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./failover.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simulate() {
        let cli = Cli::try_parse_from([
            "failover",
            "--debug",
            "simulate",
            "--topology",
            "t.json",
            "--candidate",
            "b",
        ])
        .unwrap();

        assert!(cli.debug);
        match cli.command {
            Command::Simulate {
                topology,
                config,
                candidate,
                hostile,
            } => {
                assert_eq!(topology, PathBuf::from("t.json"));
                assert!(config.is_none());
                assert_eq!(candidate.as_deref(), Some("b"));
                assert!(!hostile);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_check_config_default_path() {
        let cli = Cli::try_parse_from(["failover", "check-config"]).unwrap();
        match cli.command {
            Command::CheckConfig { config } => assert_eq!(config, PathBuf::from("./failover.json")),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
