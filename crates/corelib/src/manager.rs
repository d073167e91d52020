//! Owner of the current ring snapshot.
//!
//! Readers clone an `Arc<Ring>` under a brief read lock and then route
//! against that snapshot without holding any lock, so a `select` always sees
//! one consistent ring. Writers are serialized by a separate mutex, build the
//! replacement ring without blocking readers, and publish it with a single
//! pointer swap.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::hash::HashFunction;
use crate::health::HealthView;
use crate::node::{Node, NodeId};
use crate::ring::{Ring, RingBuilder};
use crate::token::Token;

/// Routes keys to healthy nodes and applies topology changes.
pub struct RingManager {
    hasher: Arc<dyn HashFunction>,
    replicas_per_weight: u32,
    current: RwLock<Arc<Ring>>,
    writer: Mutex<()>,
    health: HealthView,
}

impl RingManager {
    /// An empty manager. Every `select` fails until a node is added.
    pub fn new(
        replicas_per_weight: u32,
        hasher: Arc<dyn HashFunction>,
        health: HealthView,
    ) -> Self {
        let ring = Ring::empty(replicas_per_weight, hasher.as_ref());
        Self::from_ring(ring, hasher, health)
    }

    /// A manager seeded with `nodes`, built as a single ring.
    pub fn with_nodes(
        nodes: impl IntoIterator<Item = Node>,
        replicas_per_weight: u32,
        hasher: Arc<dyn HashFunction>,
        health: HealthView,
    ) -> Result<Self> {
        let ring = RingBuilder::new(Arc::clone(&hasher))
            .with_replicas(replicas_per_weight)
            .add_nodes(nodes)
            .build()?;
        info!(
            nodes = ring.node_count(),
            vnodes = ring.token_count(),
            hash = ring.hash_name(),
            "ring initialised"
        );
        Ok(Self::from_ring(ring, hasher, health))
    }

    fn from_ring(ring: Ring, hasher: Arc<dyn HashFunction>, health: HealthView) -> Self {
        metrics::gauge!("ring_virtual_nodes").set(ring.token_count() as f64);
        Self {
            replicas_per_weight: ring.replicas_per_weight(),
            hasher,
            current: RwLock::new(Arc::new(ring)),
            writer: Mutex::new(()),
            health,
        }
    }

    /// The ring currently used for routing.
    pub fn snapshot(&self) -> Arc<Ring> {
        self.current.read().clone()
    }

    /// Registered nodes, ordered by id.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.snapshot().nodes().cloned().collect()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.snapshot().contains(id)
    }

    pub fn replicas_per_weight(&self) -> u32 {
        self.replicas_per_weight
    }

    pub fn health(&self) -> &HealthView {
        &self.health
    }

    /// Hash a key into the ring space.
    pub fn hash_key(&self, key: &[u8]) -> Token {
        Token(self.hasher.hash(key))
    }

    /// Register `node` and publish a ring that includes it.
    ///
    /// Only keys whose nearest point now belongs to the new node move.
    pub fn add_node(&self, node: Node) -> Result<()> {
        node.validate()?;
        let _writer = self.writer.lock();
        let old = self.snapshot();
        if old.contains(&node.id) {
            return Err(Error::DuplicateNode(node.id));
        }

        let id = node.id.clone();
        let mut nodes: Vec<Arc<Node>> = old.nodes().cloned().collect();
        nodes.push(Arc::new(node));
        self.publish(Ring::build(&nodes, self.replicas_per_weight, self.hasher.as_ref()))?;
        info!(node_id = %id, nodes = nodes.len(), "node added to ring");
        Ok(())
    }

    /// Unregister `id` and publish a ring without it. Its keys fall to the
    /// next points clockwise.
    pub fn remove_node(&self, id: &NodeId) -> Result<Arc<Node>> {
        let _writer = self.writer.lock();
        let old = self.snapshot();
        let removed = old
            .get_node(id)
            .cloned()
            .ok_or_else(|| Error::UnknownNode(id.clone()))?;

        let nodes: Vec<Arc<Node>> = old.nodes().filter(|n| n.id != *id).cloned().collect();
        self.publish(Ring::build(&nodes, self.replicas_per_weight, self.hasher.as_ref()))?;
        info!(node_id = %id, nodes = nodes.len(), "node removed from ring");
        Ok(removed)
    }

    /// Swap in `ring` after checking it. Caller holds the writer lock.
    fn publish(&self, ring: Ring) -> Result<()> {
        if let Err(e) = ring.check_invariants() {
            error!(error = %e, "refusing to publish ring");
            return Err(e);
        }
        metrics::gauge!("ring_virtual_nodes").set(ring.token_count() as f64);
        *self.current.write() = Arc::new(ring);
        Ok(())
    }

    /// Healthy node responsible for `key`.
    ///
    /// Starts at the first point at or after `hash(key)` and walks clockwise
    /// past points whose owner is down. Fails with
    /// [`Error::NoAvailableNode`] when no registered node is healthy.
    pub fn select(&self, key: impl AsRef<[u8]>) -> Result<Arc<Node>> {
        let ring = self.snapshot();
        let hash = self.hash_key(key.as_ref());
        metrics::counter!("ring_select_total").increment(1);

        let mut down: HashSet<&NodeId> = HashSet::new();
        for vnode in ring.successors(hash) {
            let owner = &vnode.owner;
            if down.contains(&owner.id) {
                continue;
            }
            if self.health.is_alive(&owner.id) {
                if !down.is_empty() {
                    metrics::counter!("ring_select_failover_total").increment(1);
                }
                return Ok(Arc::clone(owner));
            }
            down.insert(&owner.id);
            if down.len() == ring.node_count() {
                break;
            }
        }

        metrics::counter!("ring_select_unavailable_total").increment(1);
        Err(Error::NoAvailableNode)
    }

    /// Up to `n` distinct healthy nodes clockwise from `key`, primary first.
    ///
    /// Callers use the tail as a fallback chain when the primary fails
    /// mid-request.
    pub fn preference_list(&self, key: impl AsRef<[u8]>, n: usize) -> Result<Vec<Arc<Node>>> {
        let ring = self.snapshot();
        let hash = self.hash_key(key.as_ref());
        let want = n.min(ring.node_count());

        let mut seen: HashSet<&NodeId> = HashSet::new();
        let mut picked = Vec::with_capacity(want);
        for vnode in ring.successors(hash) {
            if picked.len() == want || seen.len() == ring.node_count() {
                break;
            }
            let owner = &vnode.owner;
            if !seen.insert(&owner.id) {
                continue;
            }
            if self.health.is_alive(&owner.id) {
                picked.push(Arc::clone(owner));
            }
        }

        if picked.is_empty() && n > 0 {
            return Err(Error::NoAvailableNode);
        }
        Ok(picked)
    }
}
