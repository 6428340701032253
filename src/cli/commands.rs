//! CLI command implementations
//!
//! `simulate` runs one failover attempt against an in-memory topology and
//! prints the outcome as JSON on stdout. Logs go to stderr.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use super::args::{Cli, Command};
use super::config::{Config, SimulatedTopology, TopologyFile};
use super::errors::{CliError, CliResult};
use crate::context::Context;
use crate::failover::{FailoverService, TakeoverMode};
use crate::lock::{LeaseLock, MemoryLockBackend};
use crate::node::{MemoryNode, Topology};
use crate::rules::ReplicationRules;

const LOCK_DOMAIN: &str = "failover";

/// Main entry point for CLI
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.debug);
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Simulate {
            topology,
            config,
            candidate,
            hostile,
        } => simulate(&topology, config.as_deref(), candidate.as_deref(), hostile),
        Command::CheckConfig { config } => check_config(&config),
    }
}

/// `RUST_LOG` wins over `--debug`.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Load and validate a configuration file, then print it with defaults filled in.
pub fn check_config(config_path: &Path) -> CliResult<()> {
    let config = Config::load(config_path)?;
    info!(path = %config_path.display(), "configuration is valid");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Run one failover against the topology described at `topology_path`.
pub fn simulate(
    topology_path: &Path,
    config_path: Option<&Path>,
    candidate: Option<&str>,
    hostile: bool,
) -> CliResult<()> {
    let mut config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if hostile {
        config.failover.mode = TakeoverMode::Hostile;
    }

    let file = TopologyFile::load(topology_path)?;
    let sim = file.build()?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Runtime(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(run_simulation(&config, &file, &sim, candidate))
}

async fn run_simulation(
    config: &Config,
    file: &TopologyFile,
    sim: &SimulatedTopology,
    candidate: Option<&str>,
) -> CliResult<()> {
    let pump = spawn_replication(sim, file.replication_step());

    let backend = Arc::new(MemoryLockBackend::new());
    let lock = LeaseLock::new(backend, LOCK_DOMAIN, "failover-cli", config.lock.clone());
    let rules = ReplicationRules::new(config.rules.clone());
    let service = FailoverService::new(Arc::new(lock), Arc::new(rules), config.failover.clone());

    let ctx = Context::background();
    let report = match candidate {
        Some(uid) => {
            let target = sim
                .topology
                .node_by_uid(uid)
                .and_then(|child| child.parent().map(|parent| (parent, child)));
            let Some((parent, child)) = target else {
                pump.abort();
                return Err(CliError::topology_error(format!(
                    "unknown candidate {} or it has no parent",
                    uid
                )));
            };
            service.graceful_failover(&ctx, &parent, Some(&child)).await
        }
        None => service.failover(&ctx, &sim.topology).await,
    };
    pump.abort();

    let output = json!({
        "report": report.summary(),
        "topology": sim.topology.snapshot(),
        "max_concurrent_writable": sim.ledger.peak(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if report.is_degraded() {
        warn!("topology left degraded, manual intervention may be needed");
    }
    let new_primary = report.into_result()?;
    info!(new_primary = %new_primary, "failover succeeded");
    Ok(())
}

/// Every `step`, each replica applies one change if it trails its parent.
fn spawn_replication(sim: &SimulatedTopology, step: Duration) -> JoinHandle<()> {
    let topology = Arc::clone(&sim.topology);
    let backends = sim.backends.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(step);
        loop {
            ticker.tick().await;
            replicate_once(&topology, &backends);
        }
    })
}

fn replicate_once(topology: &Arc<Topology>, backends: &HashMap<String, Arc<MemoryNode>>) {
    for node in topology.nodes() {
        let Some(parent) = node.parent() else {
            continue;
        };
        let (Some(replica), Some(upstream)) =
            (backends.get(node.uid()), backends.get(parent.uid()))
        else {
            continue;
        };
        let target = upstream.current_position();
        match replica.current_position().compare(&target) {
            Ok(Ordering::Less) => replica.advance(1),
            Ok(_) => {}
            Err(e) => debug!(replica = %node.uid(), error = %e, "replica cannot follow its parent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Position;

    #[test]
    fn test_replicate_once_advances_trailing_replicas() {
        let file: TopologyFile = serde_json::from_str(
            r#"{"nodes": [
                {"uid": "p", "sequence": 5, "writable": true},
                {"uid": "a", "sequence": 3, "parent": "p"},
                {"uid": "b", "sequence": 5, "parent": "p"},
                {"uid": "c", "lineage": "other", "sequence": 1, "parent": "p"}
            ]}"#,
        )
        .unwrap();
        let sim = file.build().unwrap();

        replicate_once(&sim.topology, &sim.backends);

        assert_eq!(sim.backends["a"].current_position(), Position::new("main", 4));
        assert_eq!(sim.backends["b"].current_position(), Position::new("main", 5));
        assert_eq!(sim.backends["c"].current_position(), Position::new("other", 1));
    }

    #[test]
    fn test_simulate_reports_failure_for_missing_topology() {
        let dir = tempfile::tempdir().unwrap();
        let err = simulate(&dir.path().join("none.json"), None, None, false).unwrap_err();
        assert!(matches!(err, CliError::Topology(_)));
    }

    #[test]
    fn test_simulate_promotes_caught_up_replica() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(
            &path,
            r#"{"nodes": [
                {"uid": "p", "sequence": 10, "writable": true},
                {"uid": "a", "sequence": 9, "parent": "p"}
            ]}"#,
        )
        .unwrap();

        simulate(&path, None, None, false).unwrap();
    }

    #[test]
    fn test_simulate_unknown_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, r#"{"nodes": [{"uid": "p", "writable": true}]}"#).unwrap();

        let err = simulate(&path, None, Some("zz"), false).unwrap_err();
        assert!(err.to_string().contains("unknown candidate zz"));
        assert_eq!(err.code(), "FAILOVER_CLI_TOPOLOGY_ERROR");
    }

    #[test]
    fn test_simulate_refuses_candidate_below_replica() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(
            &path,
            r#"{"nodes": [
                {"uid": "p", "sequence": 10, "writable": true},
                {"uid": "a", "sequence": 10, "parent": "p"},
                {"uid": "g", "sequence": 10, "parent": "a"}
            ]}"#,
        )
        .unwrap();

        let err = simulate(&path, None, Some("g"), false).unwrap_err();
        assert_eq!(err.code(), "FAILOVER_CLI_FAILOVER_FAILED");
        assert!(err.to_string().contains("a is not the writable primary"));
    }

    #[test]
    fn test_simulate_no_candidates_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("topology.json");
        std::fs::write(&path, r#"{"nodes": [{"uid": "p", "writable": true}]}"#).unwrap();

        let err = simulate(&path, None, None, false).unwrap_err();
        assert_eq!(err.code(), "FAILOVER_CLI_FAILOVER_FAILED");
    }
}
