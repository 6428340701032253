//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use failover::failover::{FailoverConfig, FailoverService, TakeoverMode};
use failover::lock::{LeaseLock, LockConfig, LockService, MemoryLockBackend};
use failover::node::{MemoryNode, Node, Position, Topology, WritableLedger};
use failover::rules::{ReplicationRules, RulesConfig};

pub const DOMAIN: &str = "cluster-a";

/// A topology with direct handles on every backend.
pub struct Cluster {
    pub topology: Arc<Topology>,
    pub ledger: Arc<WritableLedger>,
    backends: HashMap<String, Arc<MemoryNode>>,
}

impl Cluster {
    pub fn new(name: &str) -> Self {
        Self {
            topology: Topology::new(name),
            ledger: WritableLedger::new(),
            backends: HashMap::new(),
        }
    }

    pub fn add(&mut self, uid: &str, sequence: u64, writable: bool) -> Node {
        let backend = Arc::new(
            MemoryNode::new(uid, Position::new("main", sequence), writable)
                .with_ledger(Arc::clone(&self.ledger)),
        );
        let node = self.topology.insert(backend.clone()).unwrap();
        self.backends.insert(uid.to_string(), backend);
        node
    }

    pub fn replica(&mut self, uid: &str, sequence: u64, parent: &Node) -> Node {
        let node = self.add(uid, sequence, false);
        node.set_parent(parent).unwrap();
        node
    }

    pub fn node(&self, uid: &str) -> Node {
        self.topology.node_by_uid(uid).unwrap()
    }

    pub fn backend(&self, uid: &str) -> &Arc<MemoryNode> {
        &self.backends[uid]
    }
}

pub fn fast_lock_config() -> LockConfig {
    LockConfig::with_ttl(Duration::from_millis(300))
}

pub fn fast_rules() -> ReplicationRules {
    ReplicationRules::new(RulesConfig {
        poll_interval_ms: 5,
        max_lag: 100,
        excluded_uids: vec![],
    })
}

pub fn fast_failover_config(mode: TakeoverMode) -> FailoverConfig {
    FailoverConfig {
        mode,
        lock_wait_timeout_ms: 500,
        catch_up_timeout_ms: 300,
        mutation_timeout_ms: 500,
        reattach_outgoing: true,
    }
}

pub fn lease(backend: &Arc<MemoryLockBackend>, owner: &str) -> Arc<LeaseLock> {
    Arc::new(LeaseLock::new(
        backend.clone(),
        DOMAIN,
        owner,
        fast_lock_config(),
    ))
}

/// A service with its own lease on `backend`.
pub fn service(
    backend: &Arc<MemoryLockBackend>,
    owner: &str,
    mode: TakeoverMode,
) -> FailoverService {
    let lock: Arc<dyn LockService> = lease(backend, owner);
    FailoverService::new(lock, Arc::new(fast_rules()), fast_failover_config(mode))
}
