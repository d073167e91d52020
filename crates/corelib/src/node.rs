//! Node abstractions for the consistent hash ring.
//!
//! A node is one backend store. Identity is the string id: two nodes with the
//! same id are the same logical backend. Nodes are immutable once created;
//! changing an address or weight means removing the node and adding a new one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a backend node.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

fn default_weight() -> u32 {
    1
}

/// Backend participating in the ring.
///
/// Keep this struct small and cheap to clone; connections and health state
/// live in the backend pool and health monitor, keyed by [`NodeId`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Address handed to the backend connector (e.g. `host:port`).
    pub address: String,
    /// Relative capacity; a node of weight `w` owns `w` times the base
    /// number of virtual nodes.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl Node {
    /// Construct a node descriptor.
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>, weight: u32) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            weight,
        }
    }

    /// Reject descriptors that cannot be placed on a ring.
    pub fn validate(&self) -> Result<()> {
        if self.id.0.is_empty() {
            return Err(Error::InvalidNode("node id must not be empty".into()));
        }
        if self.weight == 0 {
            return Err(Error::InvalidNode(format!(
                "node {} has weight 0, weight must be at least 1",
                self.id
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} (w={})", self.id, self.address, self.weight)
    }
}
