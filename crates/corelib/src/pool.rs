//! One lazily-created, reused backend client per registered node.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::backend::{Backend, BackendConnector, BackendError};
use crate::error::{Error, Result};
use crate::node::{Node, NodeId};

type ClientCell = Arc<OnceCell<Arc<dyn Backend>>>;

/// Holds the client for each registered node.
///
/// The first [`BackendPool::get`] for a node connects; every later call
/// returns the same client. A failed connect leaves the slot empty, so the
/// next call retries, and the error is returned to the caller (the health
/// probe, usually) instead of being swallowed.
pub struct BackendPool {
    connector: Arc<dyn BackendConnector>,
    nodes: DashMap<NodeId, Arc<Node>>,
    clients: DashMap<NodeId, ClientCell>,
}

impl BackendPool {
    pub fn new(connector: Arc<dyn BackendConnector>) -> Self {
        Self {
            connector,
            nodes: DashMap::new(),
            clients: DashMap::new(),
        }
    }

    /// Make `node` eligible for a client. Does not connect.
    pub fn register(&self, node: Arc<Node>) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn is_registered(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Client for `id`, connecting on first access.
    pub async fn get(&self, id: &NodeId) -> Result<Arc<dyn Backend>> {
        let node = self
            .nodes
            .get(id)
            .map(|n| Arc::clone(n.value()))
            .ok_or_else(|| Error::UnknownNode(id.clone()))?;

        let cell = Arc::clone(self.clients.entry(id.clone()).or_default().value());
        let client = cell
            .get_or_try_init(|| async {
                let client = self.connector.connect(&node).await?;
                metrics::counter!("backend_clients_created_total").increment(1);
                debug!(node_id = %node.id, address = %node.address, "backend client created");
                Ok::<_, BackendError>(client)
            })
            .await
            .map_err(|source| Error::Backend {
                node: id.clone(),
                source,
            })?;
        let client = Arc::clone(client);

        // The node may have been evicted, and possibly re-registered with a
        // fresh cell, while we were connecting. Only the current cell's
        // client is closed by a later evict.
        let current = self
            .clients
            .get(id)
            .map_or(false, |c| Arc::ptr_eq(c.value(), &cell));
        if !current {
            client.close().await;
            return Err(Error::UnknownNode(id.clone()));
        }
        Ok(client)
    }

    /// Forget `id`, closing its client if one was created.
    pub async fn evict(&self, id: &NodeId) {
        self.nodes.remove(id);
        if let Some((_, cell)) = self.clients.remove(id) {
            if let Some(client) = cell.get() {
                client.close().await;
                debug!(node_id = %id, "backend client closed");
            }
        }
    }

    /// Close every client and forget every node.
    pub async fn close_all(&self) {
        let ids: Vec<NodeId> = self.nodes.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.evict(&id).await;
        }
    }

    /// Number of nodes with a connected client.
    pub fn connected(&self) -> usize {
        self.clients
            .iter()
            .filter(|cell| cell.value().initialized())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryConnector;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    /// Parks every connect until released, remembering what it handed out.
    #[derive(Default)]
    struct GatedConnector {
        inner: MemoryConnector,
        entered: Notify,
        release: Notify,
        handed_out: Mutex<Vec<Arc<dyn Backend>>>,
    }

    #[async_trait]
    impl BackendConnector for GatedConnector {
        async fn connect(
            &self,
            node: &Node,
        ) -> std::result::Result<Arc<dyn Backend>, BackendError> {
            self.entered.notify_one();
            self.release.notified().await;
            let client = self.inner.connect(node).await?;
            self.handed_out.lock().push(Arc::clone(&client));
            Ok(client)
        }
    }

    fn setup() -> (Arc<MemoryConnector>, BackendPool, Arc<Node>) {
        let connector = Arc::new(MemoryConnector::new());
        let pool = BackendPool::new(connector.clone());
        let node = Arc::new(Node::new("cache-a", "memory://a", 1));
        pool.register(node.clone());
        (connector, pool, node)
    }

    #[tokio::test]
    async fn test_client_created_once_and_reused() {
        let (connector, pool, node) = setup();
        assert_eq!(pool.connected(), 0);

        let first = pool.get(&node.id).await.unwrap();
        let second = pool.get(&node.id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(pool.connected(), 1);
    }

    #[tokio::test]
    async fn test_unknown_node() {
        let (_, pool, _) = setup();
        let err = pool.get(&NodeId::from("nope")).await.err().unwrap();
        assert!(matches!(err, Error::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_and_retries() {
        let (connector, pool, node) = setup();
        connector.set_reachable(&node, false);

        match pool.get(&node.id).await {
            Err(Error::Backend { source, .. }) => {
                assert_eq!(source, BackendError::Unreachable("memory://a".into()))
            }
            other => panic!("expected backend error, got {:?}", other.map(|_| ())),
        }

        connector.set_reachable(&node, true);
        assert!(pool.get(&node.id).await.is_ok());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_evict_closes_client() {
        let (_, pool, node) = setup();
        let client = pool.get(&node.id).await.unwrap();

        pool.evict(&node.id).await;
        assert_eq!(client.probe().await, Err(BackendError::Closed));
        assert!(!pool.is_registered(&node.id));
        assert!(matches!(
            pool.get(&node.id).await,
            Err(Error::UnknownNode(_))
        ));
    }

    #[tokio::test]
    async fn test_client_from_superseded_connect_is_closed() {
        let connector = Arc::new(GatedConnector::default());
        let pool = Arc::new(BackendPool::new(connector.clone()));
        let node = Arc::new(Node::new("cache-a", "memory://a", 1));
        pool.register(node.clone());

        let pending = tokio::spawn({
            let pool = Arc::clone(&pool);
            let id = node.id.clone();
            async move { pool.get(&id).await.map(|_| ()) }
        });
        connector.entered.notified().await;

        // Evict and re-register while the first connect is parked.
        pool.evict(&node.id).await;
        pool.register(node.clone());
        connector.release.notify_one();

        assert!(matches!(
            pending.await.unwrap(),
            Err(Error::UnknownNode(_))
        ));
        let stale = Arc::clone(&connector.handed_out.lock()[0]);
        assert_eq!(stale.probe().await, Err(BackendError::Closed));

        connector.release.notify_one();
        let fresh = pool.get(&node.id).await.unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert!(fresh.probe().await.is_ok());
    }
}
