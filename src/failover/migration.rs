//! Topology migration
//!
//! Moves the remaining children of the outgoing primary under the new one.
//! Failures are collected per child; one bad child never stops the batch.

use serde::Serialize;
use tracing::{debug, warn};

use crate::node::{Node, NodeError};

/// A child that could not be re-parented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFailure {
    pub uid: String,
    pub error: NodeError,
}

/// Aggregate outcome of `migrate_children`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Children now under the destination.
    pub migrated: Vec<String>,
    /// Children that were already under the destination.
    pub skipped: Vec<String>,
    pub failed: Vec<MigrationFailure>,
}

impl MigrationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> MigrationSummary {
        MigrationSummary {
            migrated: self.migrated.clone(),
            skipped: self.skipped.clone(),
            failed: self
                .failed
                .iter()
                .map(|f| (f.uid.clone(), f.error.to_string()))
                .collect(),
        }
    }
}

/// Serializable form of a `MigrationReport`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub migrated: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Re-parent every child of `source` except `dest` itself under `dest`.
pub fn migrate_children(source: &Node, dest: &Node) -> MigrationReport {
    let mut report = MigrationReport::default();

    for child in source.children() {
        if child == *dest {
            continue;
        }
        match child.set_parent(dest) {
            Ok(()) => {
                debug!(child = %child.uid(), dest = %dest.uid(), "child migrated");
                report.migrated.push(child.uid().to_string());
            }
            Err(NodeError::AlreadyChild { .. }) => {
                report.skipped.push(child.uid().to_string());
            }
            Err(error) => {
                warn!(
                    child = %child.uid(),
                    dest = %dest.uid(),
                    error = %error,
                    "child migration failed"
                );
                report.failed.push(MigrationFailure {
                    uid: child.uid().to_string(),
                    error,
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::node::{MemoryNode, Position, Topology};

    fn node(topology: &Arc<Topology>, uid: &str) -> Node {
        topology
            .insert(Arc::new(MemoryNode::new(uid, Position::new("L", 0), false)))
            .unwrap()
    }

    #[test]
    fn test_moves_all_children_except_dest() {
        let topology = Topology::new("m");
        let p = node(&topology, "p");
        let a = node(&topology, "a");
        let b = node(&topology, "b");
        let c = node(&topology, "c");
        for child in [&a, &b, &c] {
            child.set_parent(&p).unwrap();
        }

        let report = migrate_children(&p, &b);

        assert_eq!(report.migrated, vec!["a", "c"]);
        assert!(report.is_complete());
        assert_eq!(b.parent(), Some(p.clone()));
        assert_eq!(a.parent(), Some(b.clone()));
        assert_eq!(c.parent(), Some(b.clone()));
        assert_eq!(p.children(), vec![b.clone()]);
        assert!(topology.verify_links());
    }

    #[test]
    fn test_failures_do_not_stop_the_batch() {
        let topology = Topology::new("m");
        let p = node(&topology, "p");
        let a = node(&topology, "a");
        let dest = node(&topology, "dest");
        let b = node(&topology, "b");
        a.set_parent(&p).unwrap();
        b.set_parent(&p).unwrap();
        // dest lives under a, so moving a under dest would close a cycle
        dest.set_parent(&a).unwrap();

        let report = migrate_children(&p, &dest);

        assert_eq!(report.migrated, vec!["b"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].uid, "a");
        assert!(matches!(report.failed[0].error, NodeError::WouldCreateCycle { .. }));
        assert!(!report.is_complete());
        assert_eq!(report.summary().failed.len(), 1);
    }

    #[test]
    fn test_existing_children_are_skipped() {
        let topology = Topology::new("m");
        let p = node(&topology, "p");
        let a = node(&topology, "a");
        a.set_parent(&p).unwrap();

        let report = migrate_children(&p, &p);

        assert_eq!(report.skipped, vec!["a"]);
        assert!(report.migrated.is_empty());
        assert!(report.is_complete());
        assert_eq!(p.children(), vec![a]);
    }

    #[test]
    fn test_empty_source() {
        let topology = Topology::new("m");
        let p = node(&topology, "p");
        let dest = node(&topology, "dest");
        assert_eq!(migrate_children(&p, &dest), MigrationReport::default());
    }
}
