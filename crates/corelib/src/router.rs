//! Facade wiring the ring manager, health monitor and backend pool together.
//!
//! Application code holds one [`CacheRouter`] for the lifetime of the
//! service: construct it from configuration at startup, [`start`] it inside
//! the runtime, route with [`select`] or [`client_for`], and call
//! [`shutdown`] on the way out.
//!
//! [`start`]: CacheRouter::start
//! [`select`]: CacheRouter::select
//! [`client_for`]: CacheRouter::client_for
//! [`shutdown`]: CacheRouter::shutdown

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::backend::{Backend, BackendConnector};
use crate::config::RingConfig;
use crate::error::{Error, Result};
use crate::hash::HashFunction;
use crate::health::{HealthConfig, HealthMonitor, HealthStatus};
use crate::manager::RingManager;
use crate::node::{Node, NodeId};
use crate::pool::BackendPool;

pub struct CacheRouter {
    manager: RingManager,
    monitor: HealthMonitor,
    pool: Arc<BackendPool>,
    /// Serializes add/remove so the three components stay in step.
    admin: Mutex<()>,
}

impl CacheRouter {
    /// Build the router and its initial ring from `config`.
    pub fn from_config(config: &RingConfig, connector: Arc<dyn BackendConnector>) -> Result<Self> {
        config.validate()?;
        Self::with_nodes(
            config.nodes.clone(),
            config.replicas_per_weight,
            config.hash.build(),
            config.health.to_health_config(),
            connector,
        )
    }

    pub fn with_nodes(
        nodes: Vec<Node>,
        replicas_per_weight: u32,
        hasher: Arc<dyn HashFunction>,
        health: HealthConfig,
        connector: Arc<dyn BackendConnector>,
    ) -> Result<Self> {
        let pool = Arc::new(BackendPool::new(connector));
        let monitor = HealthMonitor::new(health, Arc::clone(&pool));
        let manager = RingManager::with_nodes(
            nodes.iter().cloned(),
            replicas_per_weight,
            hasher,
            monitor.view(),
        )?;

        for node in manager.nodes() {
            pool.register(Arc::clone(&node));
            monitor.register(&node.id);
        }

        Ok(Self {
            manager,
            monitor,
            pool,
            admin: Mutex::new(()),
        })
    }

    /// Start health probing. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        self.monitor.start();
    }

    /// Stop every probe loop and close every backend client.
    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
        self.pool.close_all().await;
        info!("router shut down");
    }

    /// Register a backend and put it on the ring.
    ///
    /// The client and health entry exist before the node becomes routable,
    /// so a `select` never returns a node the pool cannot serve.
    pub async fn add_node(&self, node: Node) -> Result<()> {
        node.validate()?;
        let _admin = self.admin.lock().await;
        if self.manager.contains(&node.id) {
            return Err(Error::DuplicateNode(node.id));
        }

        let shared = Arc::new(node.clone());
        self.pool.register(Arc::clone(&shared));
        self.monitor.register(&shared.id);
        if let Err(e) = self.manager.add_node(node) {
            self.monitor.deregister(&shared.id).await;
            self.pool.evict(&shared.id).await;
            return Err(e);
        }
        Ok(())
    }

    /// Take a backend off the ring, stop probing it and close its client.
    pub async fn remove_node(&self, id: &NodeId) -> Result<()> {
        let _admin = self.admin.lock().await;
        self.manager.remove_node(id)?;
        self.monitor.deregister(id).await;
        self.pool.evict(id).await;
        Ok(())
    }

    /// Healthy node responsible for `key`.
    pub fn select(&self, key: impl AsRef<[u8]>) -> Result<Arc<Node>> {
        self.manager.select(key)
    }

    /// Route `key` and return the chosen node's client.
    pub async fn client_for(&self, key: impl AsRef<[u8]>) -> Result<(Arc<Node>, Arc<dyn Backend>)> {
        let node = self.manager.select(key)?;
        let client = self.pool.get(&node.id).await?;
        Ok((node, client))
    }

    /// Health of every registered node.
    pub fn status(&self) -> BTreeMap<NodeId, HealthStatus> {
        self.monitor.status()
    }

    pub fn manager(&self) -> &RingManager {
        &self.manager
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn pool(&self) -> &Arc<BackendPool> {
        &self.pool
    }
}
