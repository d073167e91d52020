//! Backend liveness tracking.
//!
//! [`HealthMonitor`] runs one probe loop per registered node and owns the
//! per-node [`HealthStatus`]. The ring manager reads that status through a
//! [`HealthView`] on every `select`; health never changes ring topology.
//!
//! The policy is slow to fail and fast to recover: a node is marked down only
//! after `failure_threshold` consecutive failed probes, and marked up again
//! on the first successful one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::node::NodeId;
use crate::pool::BackendPool;

/// Liveness state of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub alive: bool,
    /// When the most recent probe completed; `None` until the first probe.
    pub last_probe_at: Option<SystemTime>,
    pub consecutive_failures: u32,
}

impl HealthStatus {
    fn fresh() -> Self {
        Self {
            alive: true,
            last_probe_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Status transition published by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEvent {
    pub node_id: NodeId,
    pub alive: bool,
}

/// Probe tuning.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Time between two probes of the same node.
    pub interval: Duration,
    /// Consecutive failures before a node is marked down.
    pub failure_threshold: u32,
    /// Upper bound on a single probe, connect included.
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            failure_threshold: 3,
            probe_timeout: Duration::from_millis(500),
        }
    }
}

/// Per-node status, written only by the monitor.
#[derive(Debug, Default)]
pub(crate) struct HealthTable {
    entries: DashMap<NodeId, HealthStatus>,
}

impl HealthTable {
    /// Insert or reset `id` to alive.
    pub(crate) fn register(&self, id: &NodeId) {
        self.entries.insert(id.clone(), HealthStatus::fresh());
    }

    pub(crate) fn remove(&self, id: &NodeId) {
        self.entries.remove(id);
    }

    /// Record a successful probe. Returns an event when the node comes back.
    pub(crate) fn record_success(&self, id: &NodeId) -> Option<HealthEvent> {
        let mut status = self.entries.get_mut(id)?;
        status.last_probe_at = Some(SystemTime::now());
        status.consecutive_failures = 0;
        if status.alive {
            return None;
        }
        status.alive = true;
        Some(HealthEvent {
            node_id: id.clone(),
            alive: true,
        })
    }

    /// Record a failed probe. Returns an event when the failure streak
    /// reaches `threshold` and the node goes down.
    pub(crate) fn record_failure(&self, id: &NodeId, threshold: u32) -> Option<HealthEvent> {
        let mut status = self.entries.get_mut(id)?;
        status.last_probe_at = Some(SystemTime::now());
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        if !status.alive || status.consecutive_failures < threshold {
            return None;
        }
        status.alive = false;
        Some(HealthEvent {
            node_id: id.clone(),
            alive: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn set_alive(&self, id: &NodeId, alive: bool) {
        self.entries
            .entry(id.clone())
            .or_insert_with(HealthStatus::fresh)
            .alive = alive;
    }
}

/// Read-only handle on node health.
///
/// Nodes the monitor does not track are reported alive, so a ring manager
/// used without a monitor routes purely by topology.
#[derive(Debug, Clone, Default)]
pub struct HealthView {
    table: Arc<HealthTable>,
}

impl HealthView {
    pub(crate) fn new(table: Arc<HealthTable>) -> Self {
        Self { table }
    }

    /// A view over nothing: every node is alive.
    pub fn always_alive() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_alive(&self, id: &NodeId) -> bool {
        self.table.entries.get(id).map_or(true, |s| s.alive)
    }

    pub fn get(&self, id: &NodeId) -> Option<HealthStatus> {
        self.table.entries.get(id).map(|s| s.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<NodeId, HealthStatus> {
        self.table
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

/// Everything a probe loop needs, cloned into each task.
#[derive(Clone)]
struct Prober {
    config: HealthConfig,
    table: Arc<HealthTable>,
    pool: Arc<BackendPool>,
    events: broadcast::Sender<HealthEvent>,
}

impl Prober {
    async fn probe(&self, id: &NodeId) -> Result<()> {
        let attempt = async {
            let client = self.pool.get(id).await?;
            client.probe().await.map_err(|source| Error::Backend {
                node: id.clone(),
                source,
            })
        };
        match tokio::time::timeout(self.config.probe_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(Error::Backend {
                node: id.clone(),
                source: crate::backend::BackendError::Timeout,
            }),
        }
    }

    /// Probe once and apply the result to the table.
    async fn probe_and_record(&self, id: &NodeId) {
        let event = match self.probe(id).await {
            Ok(()) => self.table.record_success(id),
            Err(e) => {
                debug!(node_id = %id, error = %e, "probe failed");
                self.table.record_failure(id, self.config.failure_threshold)
            }
        };
        if let Some(event) = event {
            self.publish(event);
        }
    }

    fn publish(&self, event: HealthEvent) {
        if event.alive {
            info!(node_id = %event.node_id, "node recovered, routing restored");
            metrics::counter!("health_transitions_total", "state" => "up").increment(1);
        } else {
            warn!(
                node_id = %event.node_id,
                threshold = self.config.failure_threshold,
                "node marked down after consecutive probe failures"
            );
            metrics::counter!("health_transitions_total", "state" => "down").increment(1);
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn run(self, id: NodeId, mut shutdown: watch::Receiver<bool>) {
        debug!(node_id = %id, interval = ?self.config.interval, "probe loop started");
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.probe_and_record(&id).await,
                _ = shutdown.changed() => break,
            }
        }
        debug!(node_id = %id, "probe loop stopped");
    }
}

struct ProbeTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodically probes every registered node.
pub struct HealthMonitor {
    prober: Prober,
    tasks: Mutex<HashMap<NodeId, ProbeTask>>,
    started: Mutex<bool>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, pool: Arc<BackendPool>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            prober: Prober {
                config,
                table: Arc::new(HealthTable::default()),
                pool,
                events,
            },
            tasks: Mutex::new(HashMap::new()),
            started: Mutex::new(false),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.prober.config
    }

    /// Read-only handle for the ring manager.
    pub fn view(&self) -> HealthView {
        HealthView::new(Arc::clone(&self.prober.table))
    }

    /// Receive every alive/down transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.prober.events.subscribe()
    }

    /// Current status of every tracked node.
    pub fn status(&self) -> BTreeMap<NodeId, HealthStatus> {
        self.view().snapshot()
    }

    /// Start tracking `id` as alive. Once the monitor is started this also
    /// spawns its probe loop, so it must be called inside a Tokio runtime.
    pub fn register(&self, id: &NodeId) {
        self.prober.table.register(id);
        if *self.started.lock() {
            self.spawn(id.clone());
        }
    }

    /// Stop probing `id` and drop its status. Waits for the loop to exit.
    pub async fn deregister(&self, id: &NodeId) {
        let task = self.tasks.lock().remove(id);
        if let Some(task) = task {
            stop(id, task).await;
        }
        self.prober.table.remove(id);
    }

    /// Spawn a probe loop for every tracked node. Idempotent.
    pub fn start(&self) {
        {
            let mut started = self.started.lock();
            if *started {
                return;
            }
            *started = true;
        }
        let ids: Vec<NodeId> = self
            .prober
            .table
            .entries
            .iter()
            .map(|e| e.key().clone())
            .collect();
        info!(nodes = ids.len(), "health monitor started");
        for id in ids {
            self.spawn(id);
        }
    }

    /// Stop every probe loop. Statuses are kept for inspection.
    pub async fn shutdown(&self) {
        *self.started.lock() = false;
        let tasks: Vec<(NodeId, ProbeTask)> = self.tasks.lock().drain().collect();
        for (id, task) in tasks {
            stop(&id, task).await;
        }
        info!("health monitor stopped");
    }

    /// Probe `id` once, outside the periodic schedule, and return its
    /// updated status.
    pub async fn probe_once(&self, id: &NodeId) -> Result<HealthStatus> {
        if self.view().get(id).is_none() {
            return Err(Error::UnknownNode(id.clone()));
        }
        self.prober.probe_and_record(id).await;
        self.view()
            .get(id)
            .ok_or_else(|| Error::UnknownNode(id.clone()))
    }

    /// Number of running probe loops.
    pub fn running(&self) -> usize {
        self.tasks.lock().len()
    }

    fn spawn(&self, id: NodeId) {
        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(self.prober.clone().run(id.clone(), rx));
        let previous = self.tasks.lock().insert(id, ProbeTask { shutdown, handle });
        if let Some(previous) = previous {
            // Re-registration without deregister: the old loop just stops.
            let _ = previous.shutdown.send(true);
        }
    }
}

async fn stop(id: &NodeId, task: ProbeTask) {
    let _ = task.shutdown.send(true);
    if let Err(e) = task.handle.await {
        warn!(node_id = %id, error = %e, "probe loop ended abnormally");
    }
}
