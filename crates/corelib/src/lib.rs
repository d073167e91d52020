//! Core library for routing cache and rate-limit keys across backends.
//!
//! This crate provides the key-to-backend assignment layer:
//! - Hash functions and ring tokens
//! - Node and virtual node abstractions
//! - Immutable ring snapshots and a manager that swaps them atomically
//! - Health monitoring that steers routing without touching topology
//! - A pool of lazily created backend clients

pub mod backend;
pub mod config;
pub mod error;
pub mod hash;
pub mod health;
pub mod manager;
pub mod node;
pub mod pool;
pub mod ring;
pub mod router;
pub mod token;
pub mod vnode;

pub use backend::{Backend, BackendConnector, BackendError, MemoryBackend, MemoryConnector};
pub use config::RingConfig;
pub use error::{Error, Result};
pub use hash::{HashFunction, HashKind};
pub use health::{HealthConfig, HealthEvent, HealthMonitor, HealthStatus, HealthView};
pub use manager::RingManager;
pub use node::{Node, NodeId};
pub use pool::BackendPool;
pub use ring::{Ring, RingBuilder};
pub use router::CacheRouter;
pub use token::Token;
pub use vnode::VirtualNode;
