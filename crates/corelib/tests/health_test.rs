//! Background probe loops driving routing through a running router.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use corelib::hash::Xxh3Hash;
use corelib::{CacheRouter, HealthConfig, HealthEvent, MemoryConnector, Node, NodeId};
use tokio::sync::broadcast;
use tokio::time::timeout;

fn node(id: &str) -> Node {
    Node::new(id, format!("memory://{id}"), 1)
}

fn router(connector: Arc<MemoryConnector>) -> CacheRouter {
    CacheRouter::with_nodes(
        vec![node("a"), node("b"), node("c")],
        10,
        Arc::new(Xxh3Hash),
        HealthConfig {
            interval: Duration::from_millis(10),
            failure_threshold: 2,
            probe_timeout: Duration::from_millis(100),
        },
        connector,
    )
    .unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<HealthEvent>) -> HealthEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no health event within 5s")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_probe_loop_marks_down_and_recovers() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(connector.clone());
    let mut events = router.monitor().subscribe();
    router.start();

    let key = "ratelimit:10.1.2.3";
    let primary = router.select(key).unwrap();

    connector.set_reachable(&primary, false);
    let event = next_event(&mut events).await;
    assert_eq!(
        event,
        HealthEvent {
            node_id: primary.id.clone(),
            alive: false
        }
    );
    let status = router.status()[&primary.id].clone();
    assert!(!status.alive);
    assert!(status.consecutive_failures >= 2);

    let fallback = router.select(key).unwrap();
    assert_ne!(fallback.id, primary.id);

    connector.set_reachable(&primary, true);
    let event = next_event(&mut events).await;
    assert!(event.alive);
    assert_eq!(router.select(key).unwrap().id, primary.id);

    router.shutdown().await;
    assert_eq!(router.monitor().running(), 0);
}

#[tokio::test]
async fn test_nodes_added_at_runtime_are_probed() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(connector.clone());
    let mut events = router.monitor().subscribe();
    router.start();

    let d = node("d");
    connector.set_reachable(&d, false);
    router.add_node(d.clone()).await.unwrap();
    assert_eq!(router.monitor().running(), 4);

    // Fresh registrations start alive, then the loop finds out.
    let event = next_event(&mut events).await;
    assert_eq!(event.node_id, NodeId::from("d"));
    assert!(!event.alive);

    router.remove_node(&d.id).await.unwrap();
    assert_eq!(router.monitor().running(), 3);
    router.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let connector = Arc::new(MemoryConnector::new());
    let router = router(connector);
    router.start();

    let (_, client) = router.client_for("k").await.unwrap();
    client.set("k", Bytes::from_static(b"1"), None).await.unwrap();

    router.shutdown().await;
    assert!(client.get("k").await.is_err());
    assert_eq!(router.pool().connected(), 0);
}
