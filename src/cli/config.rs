//! Configuration and topology files
//!
//! Both are JSON. Every configuration field has a default, so `{}` is a
//! valid configuration.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::{CliError, CliResult};
use crate::failover::FailoverConfig;
use crate::lock::LockConfig;
use crate::node::{Hook, MemoryNode, Position, Topology, WritableLedger};
use crate::rules::RulesConfig;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lock: LockConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub failover: FailoverConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> CliResult<()> {
        self.lock
            .validate()
            .map_err(|e| CliError::config_error(format!("lock: {}", e)))?;
        self.rules
            .validate()
            .map_err(|e| CliError::config_error(format!("rules: {}", e)))?;
        self.failover
            .validate()
            .map_err(|e| CliError::config_error(format!("failover: {}", e)))?;
        Ok(())
    }
}

/// A fault injected into a simulated node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultDef {
    pub hook: Hook,

    /// Number of failing calls; absent means every call fails
    #[serde(default)]
    pub times: Option<usize>,
}

/// One simulated replication member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDef {
    /// Identifier; generated when absent
    #[serde(default)]
    pub uid: Option<String>,

    #[serde(default = "default_lineage")]
    pub lineage: String,

    #[serde(default)]
    pub sequence: u64,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub writable: bool,

    #[serde(default)]
    pub latency_ms: Option<u64>,

    #[serde(default)]
    pub faults: Vec<FaultDef>,
}

fn default_lineage() -> String {
    "main".to_string()
}

/// Topology file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyFile {
    #[serde(default = "default_topology_name")]
    pub name: String,

    /// Replicas advance one step toward their parent this often (default: 20)
    #[serde(default = "default_replication_step_ms")]
    pub replication_step_ms: u64,

    pub nodes: Vec<NodeDef>,
}

fn default_topology_name() -> String {
    "default".to_string()
}
fn default_replication_step_ms() -> u64 {
    20
}

/// A topology built from a file, with handles on its backends.
pub struct SimulatedTopology {
    pub topology: Arc<Topology>,
    pub backends: HashMap<String, Arc<MemoryNode>>,
    pub ledger: Arc<WritableLedger>,
}

impl TopologyFile {
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::topology_error(format!("Failed to read topology: {}", e)))?;
        serde_json::from_str(&content)
            .map_err(|e| CliError::topology_error(format!("Invalid topology JSON: {}", e)))
    }

    pub fn replication_step(&self) -> Duration {
        Duration::from_millis(self.replication_step_ms.max(1))
    }

    /// Build the in-memory topology: insert every node, then link parents.
    pub fn build(&self) -> CliResult<SimulatedTopology> {
        if self.nodes.is_empty() {
            return Err(CliError::topology_error("topology has no nodes"));
        }

        let topology = Topology::new(self.name.clone());
        let ledger = WritableLedger::new();
        let mut backends = HashMap::new();
        let mut uids = Vec::with_capacity(self.nodes.len());

        for def in &self.nodes {
            let uid = def.uid.clone().unwrap_or_else(|| topology.next_uid());
            let backend = Arc::new(
                MemoryNode::new(
                    uid.clone(),
                    Position::new(def.lineage.clone(), def.sequence),
                    def.writable,
                )
                .with_ledger(Arc::clone(&ledger)),
            );
            backend.set_latency(def.latency_ms.map(Duration::from_millis));
            for fault in &def.faults {
                match fault.times {
                    Some(n) => backend.fail_next(fault.hook, n),
                    None => backend.fail_always(fault.hook),
                }
            }

            topology
                .insert(backend.clone())
                .map_err(|e| CliError::topology_error(e.to_string()))?;
            backends.insert(uid.clone(), backend);
            uids.push(uid);
        }

        for (def, uid) in self.nodes.iter().zip(&uids) {
            let Some(parent_uid) = &def.parent else {
                continue;
            };
            let linked = (topology.node_by_uid(uid), topology.node_by_uid(parent_uid));
            let (child, parent) = match linked {
                (Some(child), Some(parent)) => (child, parent),
                _ => {
                    return Err(CliError::topology_error(format!(
                        "node {} has unknown parent {}",
                        uid, parent_uid
                    )))
                }
            };
            child
                .set_parent(&parent)
                .map_err(|e| CliError::topology_error(e.to_string()))?;
        }

        Ok(SimulatedTopology {
            topology,
            backends,
            ledger,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = write_temp("{}");
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let file = write_temp(r#"{"lock": {"lease_ttl_ms": 100, "renew_interval_ms": 200}}"#);
        let err = Config::load(file.path()).unwrap_err();
        assert_eq!(err.code(), "FAILOVER_CLI_CONFIG_ERROR");
        assert!(err.to_string().starts_with("lock:"));
    }

    #[test]
    fn test_malformed_config_rejected() {
        let file = write_temp("{not json");
        assert!(matches!(Config::load(file.path()), Err(CliError::Config(_))));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn test_build_topology() {
        let file = write_temp(
            r#"{
                "name": "demo",
                "nodes": [
                    {"uid": "p", "sequence": 10, "writable": true},
                    {"uid": "a", "sequence": 8, "parent": "p"},
                    {"sequence": 10, "parent": "p",
                     "faults": [{"hook": "complete_takeover", "times": 1}]}
                ]
            }"#,
        );
        let sim = TopologyFile::load(file.path()).unwrap().build().unwrap();

        assert_eq!(sim.topology.len(), 3);
        assert_eq!(sim.ledger.current(), 1);
        let primary = sim.topology.node_by_uid("p").unwrap();
        assert_eq!(primary.children().len(), 2);
        assert!(sim.topology.verify_links());
        // the unnamed node drew "1" from the topology's generator
        assert!(sim.backends.contains_key("1"));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let topology = TopologyFile {
            name: "t".into(),
            replication_step_ms: 20,
            nodes: vec![NodeDef {
                uid: Some("a".into()),
                lineage: "main".into(),
                sequence: 0,
                parent: Some("ghost".into()),
                writable: false,
                latency_ms: None,
                faults: vec![],
            }],
        };
        assert!(matches!(topology.build(), Err(CliError::Topology(_))));
    }
}
