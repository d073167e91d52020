//! Error types for the core library.

use crate::backend::BackendError;
use crate::node::NodeId;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// AddNode with an id that is already registered.
    #[error("node {0} is already registered")]
    DuplicateNode(NodeId),

    /// RemoveNode or lookup referencing an id that is not registered.
    #[error("node {0} is not registered")]
    UnknownNode(NodeId),

    /// Every registered node is unhealthy, or none are registered.
    #[error("no available node")]
    NoAvailableNode,

    /// Node descriptor failed validation (empty id, zero weight).
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// Startup configuration failed to load or validate.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The backend client for a node could not be created or used.
    #[error("backend {node}: {source}")]
    Backend {
        node: NodeId,
        #[source]
        source: BackendError,
    },

    /// A constructed ring broke one of its structural invariants.
    ///
    /// This is a logic defect; the offending ring is never published.
    #[error("ring invariant violated: {0}")]
    RingInvariant(String),
}
