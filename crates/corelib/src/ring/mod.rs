//! Consistent hash ring implementation.
//!
//! The ring is an immutable snapshot of virtual node positions and provides
//! lookup operations for finding the node responsible for a key hash.

pub mod ring;

pub use ring::{HashRing, RingBuilder, DEFAULT_REPLICAS_PER_WEIGHT};

/// Alias for the main ring type (used by lib.rs).
pub type Ring = HashRing;
