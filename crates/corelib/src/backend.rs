//! Key-value contract every backend client satisfies.
//!
//! The ring never speaks a store protocol itself. Whatever client is wired in
//! implements [`Backend`], and a [`BackendConnector`] turns a [`Node`]
//! descriptor into a connected client. [`MemoryConnector`] is an in-process
//! implementation used by the CLI and by tests; it can mark individual nodes
//! unreachable to exercise failover.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::node::{Node, NodeId};

/// Failures reported by a backend client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unreachable at {0}")]
    Unreachable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("client closed")]
    Closed,

    #[error("operation failed: {0}")]
    Operation(String),
}

/// Generic key-value operations issued after a key has been routed.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    /// Store `value`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), BackendError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, BackendError>;

    /// Remaining time to live; `None` when the key is absent or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, BackendError>;

    /// Lightweight liveness check (ping/echo).
    async fn probe(&self) -> Result<(), BackendError>;

    /// Release the underlying connection. Later calls fail with
    /// [`BackendError::Closed`].
    async fn close(&self);
}

/// Creates backend clients from node descriptors.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, node: &Node) -> Result<Arc<dyn Backend>, BackendError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// Data and reachability of one simulated store server.
#[derive(Debug)]
struct MemoryServer {
    address: String,
    entries: DashMap<String, Entry>,
    reachable: AtomicBool,
}

impl MemoryServer {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_owned(),
            entries: DashMap::new(),
            reachable: AtomicBool::new(true),
        }
    }
}

/// Client connected to an in-process [`MemoryServer`].
#[derive(Debug)]
pub struct MemoryBackend {
    server: Arc<MemoryServer>,
    closed: AtomicBool,
}

impl MemoryBackend {
    fn check(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        if !self.server.reachable.load(Ordering::Acquire) {
            return Err(BackendError::Unreachable(self.server.address.clone()));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fetch a live entry, lazily evicting it if expired.
    fn live_entry(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.server.entries.get(key).map(|e| e.clone())?;
        if entry.is_expired(now) {
            self.server.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        self.check()?;
        Ok(self.live_entry(key).map(|e| e.value))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        self.check()?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.server
            .entries
            .insert(key.to_owned(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.check()?;
        let existed = self.live_entry(key).is_some();
        self.server.entries.remove(key);
        Ok(existed)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, BackendError> {
        self.check()?;
        let now = Instant::now();
        Ok(self
            .live_entry(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn probe(&self) -> Result<(), BackendError> {
        self.check()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Connector backed by in-process stores, one per node id.
///
/// Data survives reconnects, the same way it would on a real server that
/// outlives a dropped client.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    servers: DashMap<NodeId, Arc<MemoryServer>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn server(&self, node: &Node) -> Arc<MemoryServer> {
        Arc::clone(
            self.servers
                .entry(node.id.clone())
                .or_insert_with(|| Arc::new(MemoryServer::new(&node.address)))
                .value(),
        )
    }

    /// Simulate a node going down or coming back. Affects existing clients
    /// and new connection attempts alike.
    pub fn set_reachable(&self, node: &Node, reachable: bool) {
        self.server(node).reachable.store(reachable, Ordering::Release);
    }

    /// Number of successful `connect` calls so far.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Number of live keys stored on `node`.
    pub fn key_count(&self, node: &NodeId) -> usize {
        let now = Instant::now();
        self.servers
            .get(node)
            .map(|s| s.entries.iter().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BackendConnector for MemoryConnector {
    async fn connect(&self, node: &Node) -> Result<Arc<dyn Backend>, BackendError> {
        let server = self.server(node);
        if !server.reachable.load(Ordering::Acquire) {
            return Err(BackendError::Unreachable(node.address.clone()));
        }
        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryBackend {
            server,
            closed: AtomicBool::new(false),
        }))
    }
}
