//! Virtual node abstractions.
//!
//! # Virtual Nodes (VNodes) Concept
//!
//! Each physical node occupies several points on the ring instead of one.
//! A node with weight `w` under a base replica count `R` gets `R * w` points,
//! each derived by hashing `"{node_id}#{replica_index}"`. This gives:
//!
//! 1. **Better Load Distribution**: more points smooth out arc lengths
//! 2. **Gradual Rebalancing**: a joining node takes small slices from many
//!    neighbours instead of one large slice from a single neighbour
//! 3. **Weighting**: capacity maps directly to the number of points
//!
//! Virtual nodes are derived data: callers never construct them directly,
//! the ring builder does.

use std::sync::Arc;

use crate::hash::HashFunction;
use crate::node::{Node, NodeId};
use crate::token::Token;

/// A single point on the hash ring owned by a physical node.
///
/// # Invariants
///
/// - Within one ring, every `VirtualNode` has a distinct token
/// - The owner is a node registered in the ring that holds this vnode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNode {
    /// Token position on the ring.
    pub token: Token,
    /// The physical node that owns this point.
    pub owner: Arc<Node>,
}

impl VirtualNode {
    #[inline]
    pub fn new(token: Token, owner: Arc<Node>) -> Self {
        Self { token, owner }
    }

    /// Derive the `replica_index`-th virtual node of `owner`.
    ///
    /// The token is `hash("{node_id}#{replica_index}")`.
    pub fn from_index(hasher: &dyn HashFunction, owner: Arc<Node>, replica_index: u32) -> Self {
        let token = Token(hasher.hash(vnode_key(&owner.id, replica_index).as_bytes()));
        Self::new(token, owner)
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn node_id(&self) -> &NodeId {
        &self.owner.id
    }
}

/// Key hashed to place a virtual node.
pub fn vnode_key(node_id: &NodeId, replica_index: u32) -> String {
    format!("{}#{}", node_id, replica_index)
}

impl std::fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VNode(token={}, node={})", self.token, self.owner.id)
    }
}
