//! Replication Topology Registry
//!
//! The topology is an id-indexed arena. Each entry stores its parent as a
//! `NodeId` and caches its children; both sides of an edge are updated
//! under a single write lock, so a node appears in its parent's child set
//! iff its parent link points there.
//!
//! `Node` is the typed view handed to the rest of the crate: identity,
//! position, links, and lock-checked takeover hooks.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use super::errors::{NodeError, NodeResult};
use super::failable::Failable;
use super::position::Position;
use super::uid::{SequentialUids, UidGenerator};
use crate::context::Context;
use crate::lock::LockService;

/// Arena index of a node within one topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Entry {
    backend: Arc<dyn Failable>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    last_position: Option<Position>,
}

#[derive(Default)]
struct Arena {
    entries: Vec<Entry>,
    by_uid: HashMap<String, NodeId>,
}

impl Arena {
    fn entry(&self, id: NodeId) -> NodeResult<&Entry> {
        self.entries
            .get(id.0)
            .ok_or_else(|| NodeError::UnknownNode(id.to_string()))
    }

    fn uid(&self, id: NodeId) -> String {
        self.entries
            .get(id.0)
            .map(|e| e.backend.uid().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut cursor = Some(of);
        while let Some(id) = cursor {
            if id == candidate {
                return true;
            }
            cursor = self.entries.get(id.0).and_then(|e| e.parent);
        }
        false
    }

    fn unlink(&mut self, child: NodeId) {
        if let Some(old_parent) = self.entries[child.0].parent.take() {
            self.entries[old_parent.0].children.retain(|c| *c != child);
        }
    }
}

/// Registry of every member of one replication tree.
pub struct Topology {
    name: String,
    uids: Box<dyn UidGenerator>,
    arena: RwLock<Arena>,
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("name", &self.name)
            .field("nodes", &self.arena.read().entries.len())
            .finish()
    }
}

impl Topology {
    /// Create an empty topology with sequential uids.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_uids(name, SequentialUids::new())
    }

    /// Create an empty topology with the given uid generator.
    pub fn with_uids(name: impl Into<String>, uids: impl UidGenerator + 'static) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            uids: Box::new(uids),
            arena: RwLock::new(Arena::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Draw the next identifier from this topology's generator.
    pub fn next_uid(&self) -> String {
        self.uids.next_uid()
    }

    /// Register a member as a root. Rejects duplicate uids.
    pub fn insert(self: &Arc<Self>, backend: Arc<dyn Failable>) -> NodeResult<Node> {
        let mut arena = self.arena.write();
        let uid = backend.uid().to_string();
        if arena.by_uid.contains_key(&uid) {
            return Err(NodeError::DuplicateUid(uid));
        }

        let id = NodeId(arena.entries.len());
        arena.entries.push(Entry {
            backend: Arc::clone(&backend),
            parent: None,
            children: Vec::new(),
            last_position: None,
        });
        arena.by_uid.insert(uid, id);

        Ok(Node {
            topology: Arc::clone(self),
            id,
            backend,
        })
    }

    /// Look up a node by arena id.
    pub fn node(self: &Arc<Self>, id: NodeId) -> Option<Node> {
        let arena = self.arena.read();
        arena.entries.get(id.0).map(|e| Node {
            topology: Arc::clone(self),
            id,
            backend: Arc::clone(&e.backend),
        })
    }

    /// Look up a node by uid.
    pub fn node_by_uid(self: &Arc<Self>, uid: &str) -> Option<Node> {
        let id = *self.arena.read().by_uid.get(uid)?;
        self.node(id)
    }

    /// All nodes in insertion order.
    pub fn nodes(self: &Arc<Self>) -> Vec<Node> {
        let arena = self.arena.read();
        arena
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| Node {
                topology: Arc::clone(self),
                id: NodeId(i),
                backend: Arc::clone(&e.backend),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.arena.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes that currently report `writable = true`.
    pub fn writable_nodes(self: &Arc<Self>) -> Vec<Node> {
        self.nodes().into_iter().filter(|n| n.writable()).collect()
    }

    /// Make `parent` the parent of `child`, moving it from any previous parent.
    pub fn set_parent(&self, child: NodeId, parent: NodeId) -> NodeResult<()> {
        let mut arena = self.arena.write();
        arena.entry(child)?;
        arena.entry(parent)?;

        if arena.entries[parent.0].children.contains(&child) {
            return Err(NodeError::AlreadyChild {
                child: arena.uid(child),
                parent: arena.uid(parent),
            });
        }
        if arena.is_ancestor_or_self(child, parent) {
            return Err(NodeError::WouldCreateCycle {
                child: arena.uid(child),
                parent: arena.uid(parent),
            });
        }

        arena.unlink(child);
        arena.entries[child.0].parent = Some(parent);
        arena.entries[parent.0].children.push(child);
        Ok(())
    }

    /// Detach `child` from its parent, making it a root.
    pub fn detach(&self, child: NodeId) -> NodeResult<()> {
        let mut arena = self.arena.write();
        arena.entry(child)?;
        arena.unlink(child);
        Ok(())
    }

    fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.arena.read().entries.get(id.0).and_then(|e| e.parent)
    }

    fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.arena
            .read()
            .entries
            .get(id.0)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    fn record_position(&self, id: NodeId, position: Position) {
        if let Some(entry) = self.arena.write().entries.get_mut(id.0) {
            entry.last_position = Some(position);
        }
    }

    fn last_position(&self, id: NodeId) -> Option<Position> {
        self.arena
            .read()
            .entries
            .get(id.0)
            .and_then(|e| e.last_position.clone())
    }

    /// Check the parent/child consistency invariant across the whole arena.
    pub fn verify_links(&self) -> bool {
        let arena = self.arena.read();
        arena.entries.iter().enumerate().all(|(i, entry)| {
            let me = NodeId(i);
            let parent_ok = match entry.parent {
                Some(p) => arena
                    .entries
                    .get(p.0)
                    .map_or(false, |pe| pe.children.iter().filter(|c| **c == me).count() == 1),
                None => true,
            };
            let children_ok = entry
                .children
                .iter()
                .all(|c| arena.entries.get(c.0).map_or(false, |ce| ce.parent == Some(me)));
            parent_ok && children_ok
        })
    }

    /// Point-in-time, serializable view of links and writability.
    pub fn snapshot(&self) -> TopologySnapshot {
        let arena = self.arena.read();
        let nodes = arena
            .entries
            .iter()
            .map(|e| NodeSnapshot {
                uid: e.backend.uid().to_string(),
                parent: e.parent.map(|p| arena.uid(p)),
                children: e.children.iter().map(|c| arena.uid(*c)).collect(),
                writable: e.backend.writable(),
                last_position: e.last_position.clone(),
            })
            .collect();
        TopologySnapshot {
            name: self.name.clone(),
            nodes,
        }
    }
}

/// Serializable view of a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologySnapshot {
    pub name: String,
    pub nodes: Vec<NodeSnapshot>,
}

impl TopologySnapshot {
    pub fn node(&self, uid: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.uid == uid)
    }

    pub fn writable_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.writable).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub uid: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub writable: bool,
    pub last_position: Option<Position>,
}

/// Typed view over one member of a topology.
#[derive(Clone)]
pub struct Node {
    topology: Arc<Topology>,
    id: NodeId,
    backend: Arc<dyn Failable>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("uid", &self.uid())
            .field("id", &self.id)
            .field("writable", &self.writable())
            .finish()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.topology, &other.topology) && self.id == other.id
    }
}

impl Eq for Node {}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn uid(&self) -> &str {
        self.backend.uid()
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn backend(&self) -> &Arc<dyn Failable> {
        &self.backend
    }

    pub fn writable(&self) -> bool {
        self.backend.writable()
    }

    /// Parent node, `None` for a root.
    pub fn parent(&self) -> Option<Node> {
        let parent = self.topology.parent_of(self.id)?;
        self.topology.node(parent)
    }

    /// Current children, derived from their parent links.
    pub fn children(&self) -> Vec<Node> {
        self.topology
            .children_of(self.id)
            .into_iter()
            .filter_map(|id| self.topology.node(id))
            .collect()
    }

    /// Re-parent this node under `parent`.
    ///
    /// Fails with `AlreadyChild` if it is already registered there.
    pub fn set_parent(&self, parent: &Node) -> NodeResult<()> {
        if !Arc::ptr_eq(&self.topology, &parent.topology) {
            return Err(NodeError::UnknownNode(parent.uid().to_string()));
        }
        self.topology.set_parent(self.id, parent.id)
    }

    /// Make this node a root.
    pub fn detach(&self) -> NodeResult<()> {
        self.topology.detach(self.id)
    }

    /// Fetch the live position and remember it for health evaluation.
    pub async fn position(&self, ctx: &Context) -> NodeResult<Position> {
        let position = ctx.run(self.backend.position(ctx)).await??;
        self.topology.record_position(self.id, position.clone());
        Ok(position)
    }

    /// Last position observed through `position()`, without I/O.
    pub fn last_known_position(&self) -> Option<Position> {
        self.topology.last_position(self.id)
    }

    /// Compare this node's position relative to `other`'s.
    pub async fn compare_position(&self, ctx: &Context, other: &Node) -> NodeResult<Ordering> {
        let mine = self.position(ctx).await?;
        let theirs = other.position(ctx).await?;
        mine.compare(&theirs)
    }

    fn ensure_lock(&self, lock: &dyn LockService, operation: &'static str) -> NodeResult<()> {
        if lock.have_lock() {
            Ok(())
        } else {
            Err(NodeError::LockNotHeld {
                uid: self.uid().to_string(),
                operation,
            })
        }
    }

    pub async fn prepare_for_takeover(
        &self,
        ctx: &Context,
        lock: &dyn LockService,
    ) -> NodeResult<()> {
        self.ensure_lock(lock, "prepare_for_takeover")?;
        ctx.run(self.backend.prepare_for_takeover(ctx)).await?
    }

    pub async fn prepare_to_takeover(
        &self,
        ctx: &Context,
        lock: &dyn LockService,
        primary_position: &Position,
    ) -> NodeResult<()> {
        self.ensure_lock(lock, "prepare_to_takeover")?;
        ctx.run(self.backend.prepare_to_takeover(ctx, primary_position))
            .await?
    }

    pub async fn complete_takeover(
        &self,
        ctx: &Context,
        lock: &dyn LockService,
        is_writable: bool,
    ) -> NodeResult<()> {
        self.ensure_lock(lock, "complete_takeover")?;
        ctx.run(self.backend.complete_takeover(ctx, is_writable))
            .await?
    }

    pub async fn revert_takeover_attempt(
        &self,
        ctx: &Context,
        lock: &dyn LockService,
    ) -> NodeResult<()> {
        self.ensure_lock(lock, "revert_takeover_attempt")?;
        ctx.run(self.backend.revert_takeover_attempt(ctx)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MemoryNode;

    fn add(topology: &Arc<Topology>, seq: u64) -> Node {
        let uid = topology.next_uid();
        topology
            .insert(Arc::new(MemoryNode::new(uid, Position::new("L", seq), false)))
            .unwrap()
    }

    #[test]
    fn test_set_parent_links_both_sides() {
        let topology = Topology::new("t");
        let parent = add(&topology, 1);
        let child = add(&topology, 0);

        child.set_parent(&parent).unwrap();

        assert_eq!(child.parent(), Some(parent.clone()));
        assert_eq!(parent.children(), vec![child.clone()]);
        assert!(topology.verify_links());
    }

    #[test]
    fn test_set_parent_twice_is_rejected_and_unchanged() {
        let topology = Topology::new("t");
        let parent = add(&topology, 1);
        let child = add(&topology, 0);

        child.set_parent(&parent).unwrap();
        let before = topology.snapshot();

        let err = child.set_parent(&parent).unwrap_err();
        assert!(matches!(err, NodeError::AlreadyChild { .. }));
        assert_eq!(topology.snapshot(), before);
        assert_eq!(parent.children().len(), 1);
    }

    #[test]
    fn test_reparent_moves_child() {
        let topology = Topology::new("t");
        let a = add(&topology, 1);
        let b = add(&topology, 1);
        let c = add(&topology, 0);

        c.set_parent(&a).unwrap();
        c.set_parent(&b).unwrap();

        assert!(a.children().is_empty());
        assert_eq!(b.children(), vec![c.clone()]);
        assert!(topology.verify_links());
    }

    #[test]
    fn test_cycle_rejected() {
        let topology = Topology::new("t");
        let root = add(&topology, 2);
        let mid = add(&topology, 1);
        let leaf = add(&topology, 0);
        mid.set_parent(&root).unwrap();
        leaf.set_parent(&mid).unwrap();

        assert!(matches!(
            root.set_parent(&leaf),
            Err(NodeError::WouldCreateCycle { .. })
        ));
        assert!(matches!(
            root.set_parent(&root),
            Err(NodeError::WouldCreateCycle { .. })
        ));
        assert!(topology.verify_links());
    }

    #[test]
    fn test_duplicate_uid_rejected() {
        let topology = Topology::new("t");
        topology
            .insert(Arc::new(MemoryNode::new("x", Position::new("L", 0), false)))
            .unwrap();
        let err = topology
            .insert(Arc::new(MemoryNode::new("x", Position::new("L", 0), false)))
            .unwrap_err();
        assert_eq!(err, NodeError::DuplicateUid("x".into()));
    }

    #[test]
    fn test_foreign_parent_rejected() {
        let t1 = Topology::new("t1");
        let t2 = Topology::new("t2");
        let a = add(&t1, 0);
        let b = add(&t2, 0);
        assert!(matches!(a.set_parent(&b), Err(NodeError::UnknownNode(_))));
    }

    #[test]
    fn test_detach_makes_root() {
        let topology = Topology::new("t");
        let parent = add(&topology, 1);
        let child = add(&topology, 0);
        child.set_parent(&parent).unwrap();

        child.detach().unwrap();
        assert!(child.parent().is_none());
        assert!(parent.children().is_empty());
    }

    #[tokio::test]
    async fn test_position_is_cached() {
        let topology = Topology::new("t");
        let node = add(&topology, 7);
        assert!(node.last_known_position().is_none());

        let pos = node.position(&Context::background()).await.unwrap();
        assert_eq!(pos.sequence(), 7);
        assert_eq!(node.last_known_position(), Some(pos));
    }

    #[tokio::test]
    async fn test_compare_position() {
        let topology = Topology::new("t");
        let parent = add(&topology, 1);
        let child = add(&topology, 0);
        let ctx = Context::background();

        assert_eq!(child.compare_position(&ctx, &parent).await.unwrap(), Ordering::Less);
        assert_eq!(parent.compare_position(&ctx, &child).await.unwrap(), Ordering::Greater);
    }

    #[tokio::test]
    async fn test_takeover_hooks_require_lock() {
        use crate::lock::{LeaseLock, LockConfig, MemoryLockBackend};

        let topology = Topology::new("t");
        let node = add(&topology, 0);
        let lock = LeaseLock::new(
            Arc::new(MemoryLockBackend::new()),
            "t",
            "coordinator",
            LockConfig::default(),
        );

        let err = node
            .complete_takeover(&Context::background(), &lock, true)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::LockNotHeld { .. }));
        assert!(!node.writable());
    }
}
