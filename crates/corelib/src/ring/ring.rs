//! Immutable hash ring snapshot and its builder.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::hash::HashFunction;
use crate::node::{Node, NodeId};
use crate::token::Token;
use crate::vnode::VirtualNode;

/// Default number of virtual nodes per unit of weight.
pub const DEFAULT_REPLICAS_PER_WEIGHT: u32 = 10;

/// Sorted, immutable sequence of virtual nodes covering the hash space.
///
/// A ring is never mutated after construction. Topology changes build a new
/// ring from the new node set; construction is a pure function of the node
/// set, the replica count and the hash function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRing {
    vnodes: Vec<VirtualNode>,
    nodes: BTreeMap<NodeId, Arc<Node>>,
    replicas_per_weight: u32,
    hash_name: &'static str,
}

impl HashRing {
    /// Build a ring from `nodes`.
    ///
    /// For every node, `replicas_per_weight * weight` points are hashed from
    /// `"{id}#{index}"`, then sorted by token with ties broken by owner id.
    /// When two points land on the same token, the one earlier in sort order
    /// wins and the other is dropped with a warning.
    pub fn build<'a, I>(nodes: I, replicas_per_weight: u32, hasher: &dyn HashFunction) -> Self
    where
        I: IntoIterator<Item = &'a Arc<Node>>,
    {
        let nodes: BTreeMap<NodeId, Arc<Node>> = nodes
            .into_iter()
            .map(|n| (n.id.clone(), Arc::clone(n)))
            .collect();

        let total: usize = nodes
            .values()
            .map(|n| replicas_per_weight as usize * n.weight as usize)
            .sum();
        let mut vnodes = Vec::with_capacity(total);
        for node in nodes.values() {
            for index in 0..replicas_per_weight.saturating_mul(node.weight) {
                vnodes.push(VirtualNode::from_index(hasher, Arc::clone(node), index));
            }
        }

        vnodes.sort_by(|a, b| {
            a.token
                .cmp(&b.token)
                .then_with(|| a.owner.id.cmp(&b.owner.id))
        });

        let mut dropped = 0usize;
        vnodes.dedup_by(|later, kept| {
            if later.token == kept.token {
                warn!(
                    token = %later.token,
                    kept = %kept.owner.id,
                    dropped = %later.owner.id,
                    "hash point collision, dropping later virtual node"
                );
                dropped += 1;
                true
            } else {
                false
            }
        });

        if dropped > 0 {
            warn!(dropped, remaining = vnodes.len(), "ring built with collisions");
        }

        Self {
            vnodes,
            nodes,
            replicas_per_weight,
            hash_name: hasher.name(),
        }
    }

    /// A ring with no nodes.
    pub fn empty(replicas_per_weight: u32, hasher: &dyn HashFunction) -> Self {
        Self::build(std::iter::empty(), replicas_per_weight, hasher)
    }

    /// Index of the first virtual node with `token >= hash`, wrapping to 0.
    ///
    /// Returns `None` only for an empty ring.
    pub fn position(&self, hash: Token) -> Option<usize> {
        if self.vnodes.is_empty() {
            return None;
        }
        let idx = self.vnodes.partition_point(|v| v.token < hash);
        Some(if idx == self.vnodes.len() { 0 } else { idx })
    }

    /// Owner of `hash` ignoring health.
    pub fn lookup(&self, hash: Token) -> Option<&Arc<Node>> {
        self.position(hash).map(|idx| &self.vnodes[idx].owner)
    }

    /// Virtual nodes clockwise from the owner of `hash`, visiting every point
    /// exactly once and wrapping around the top of the space.
    pub fn successors(&self, hash: Token) -> impl Iterator<Item = &VirtualNode> + '_ {
        let len = self.vnodes.len();
        let start = self.position(hash).unwrap_or(0);
        (0..len).map(move |i| &self.vnodes[(start + i) % len])
    }

    /// Fraction of the hash space owned by each node.
    ///
    /// A point owns the arc running from its predecessor (exclusive) up to
    /// itself (inclusive). Fractions sum to 1.0 for a non-empty ring.
    pub fn ownership(&self) -> BTreeMap<NodeId, f64> {
        let mut share: BTreeMap<NodeId, u64> =
            self.nodes.keys().map(|id| (id.clone(), 0)).collect();

        let len = self.vnodes.len();
        for (i, vnode) in self.vnodes.iter().enumerate() {
            let arc = if len == 1 {
                Token::SPACE
            } else {
                let prev = &self.vnodes[(i + len - 1) % len];
                prev.token.distance_to(&vnode.token)
            };
            *share.entry(vnode.owner.id.clone()).or_default() += arc;
        }

        share
            .into_iter()
            .map(|(id, arc)| (id, arc as f64 / Token::SPACE as f64))
            .collect()
    }

    /// Verify the structural invariants of a constructed ring.
    pub fn check_invariants(&self) -> Result<()> {
        if !self.nodes.is_empty() && self.vnodes.is_empty() {
            return Err(Error::RingInvariant(format!(
                "{} nodes registered but ring has no points",
                self.nodes.len()
            )));
        }
        for pair in self.vnodes.windows(2) {
            if pair[0].token >= pair[1].token {
                return Err(Error::RingInvariant(format!(
                    "points out of order or duplicated at token {}",
                    pair[1].token
                )));
            }
        }
        for vnode in &self.vnodes {
            match self.nodes.get(&vnode.owner.id) {
                Some(node) if **node == *vnode.owner => {}
                _ => {
                    return Err(Error::RingInvariant(format!(
                        "{} references unregistered owner",
                        vnode
                    )))
                }
            }
        }
        Ok(())
    }

    /// Same ring with its points swapped out, for exercising invariant checks.
    #[cfg(test)]
    pub(crate) fn with_vnodes(mut self, vnodes: Vec<VirtualNode>) -> Self {
        self.vnodes = vnodes;
        self
    }

    pub fn vnodes(&self) -> &[VirtualNode] {
        &self.vnodes
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> + '_ {
        self.nodes.values()
    }

    pub fn get_node(&self, id: &NodeId) -> Option<&Arc<Node>> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn token_count(&self) -> usize {
        self.vnodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }

    pub fn replicas_per_weight(&self) -> u32 {
        self.replicas_per_weight
    }

    pub fn hash_name(&self) -> &'static str {
        self.hash_name
    }
}

/// Builder for a ring from a static node list.
///
/// ```ignore
/// let ring = RingBuilder::new(Arc::new(Xxh3Hash))
///     .with_replicas(10)
///     .add_node(Node::new("a", "10.0.0.1:6379", 1))
///     .build()?;
/// ```
pub struct RingBuilder {
    hasher: Arc<dyn HashFunction>,
    replicas_per_weight: u32,
    nodes: Vec<Arc<Node>>,
}

impl RingBuilder {
    pub fn new(hasher: Arc<dyn HashFunction>) -> Self {
        Self {
            hasher,
            replicas_per_weight: DEFAULT_REPLICAS_PER_WEIGHT,
            nodes: Vec::new(),
        }
    }

    /// Set the base number of virtual nodes per unit of weight.
    pub fn with_replicas(mut self, replicas_per_weight: u32) -> Self {
        self.replicas_per_weight = replicas_per_weight;
        self
    }

    pub fn add_node(mut self, node: Node) -> Self {
        self.nodes.push(Arc::new(node));
        self
    }

    pub fn add_nodes(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.nodes.extend(nodes.into_iter().map(Arc::new));
        self
    }

    /// Validate the node list and build the ring.
    pub fn build(self) -> Result<HashRing> {
        if self.replicas_per_weight == 0 {
            return Err(Error::InvalidConfig(
                "replicas_per_weight must be at least 1".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !seen.insert(&node.id) {
                return Err(Error::DuplicateNode(node.id.clone()));
            }
        }
        let ring = HashRing::build(&self.nodes, self.replicas_per_weight, self.hasher.as_ref());
        ring.check_invariants()?;
        Ok(ring)
    }
}
