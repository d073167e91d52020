//! Subcommands.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgGroup, Subcommand};
use corelib::{CacheRouter, HealthView, MemoryConnector, Node, NodeId, RingConfig, RingManager};

pub type CommandResult = anyhow::Result<()>;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the node each key routes to.
    Route {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show virtual node counts and hash space ownership per node.
    Inspect,

    /// Dry-run a topology change and report which sampled keys would move.
    #[command(group(ArgGroup::new("change").required(true).args(["add", "remove"])))]
    Rebalance {
        /// Node to add, as `id=<id>,address=<addr>[,weight=<n>]`.
        #[arg(long, value_parser = parse_node)]
        add: Option<Node>,

        /// Id of the node to remove.
        #[arg(long)]
        remove: Option<String>,

        /// Number of synthetic keys (`key-0`, `key-1`, ...) to route.
        #[arg(long, default_value_t = 10_000)]
        sample: usize,
    },

    /// Probe in-memory stand-ins for every node and print their health.
    Probe {
        /// Nodes to simulate as unreachable.
        #[arg(long)]
        down: Vec<String>,

        /// Number of probe intervals to run before reporting.
        #[arg(long, default_value_t = 5)]
        rounds: u32,
    },
}

impl Command {
    pub async fn execute(&self, config: &RingConfig, out: &mut impl Write) -> CommandResult {
        match self {
            Command::Route { keys } => route(config, keys, out),
            Command::Inspect => inspect(config, out),
            Command::Rebalance {
                add,
                remove,
                sample,
            } => rebalance(config, add.clone(), remove.as_deref(), *sample, out),
            Command::Probe { down, rounds } => probe(config, down, *rounds, out).await,
        }
    }
}

fn manager(config: &RingConfig) -> anyhow::Result<RingManager> {
    Ok(RingManager::with_nodes(
        config.nodes.clone(),
        config.replicas_per_weight,
        config.hash.build(),
        HealthView::always_alive(),
    )?)
}

fn route(config: &RingConfig, keys: &[String], out: &mut impl Write) -> CommandResult {
    let manager = manager(config)?;
    for key in keys {
        let node = manager
            .select(key)
            .with_context(|| format!("routing {key}"))?;
        writeln!(out, "{key}\t{}\t{}", node.id, node.address)?;
    }
    Ok(())
}

fn inspect(config: &RingConfig, out: &mut impl Write) -> CommandResult {
    let ring = manager(config)?.snapshot();
    let mut vnodes: BTreeMap<&NodeId, usize> = BTreeMap::new();
    for vnode in ring.vnodes() {
        *vnodes.entry(vnode.node_id()).or_default() += 1;
    }
    let ownership = ring.ownership();

    writeln!(
        out,
        "hash={} replicas_per_weight={} nodes={} vnodes={}",
        ring.hash_name(),
        ring.replicas_per_weight(),
        ring.node_count(),
        ring.token_count()
    )?;
    for node in ring.nodes() {
        writeln!(
            out,
            "{}\t{}\tweight={}\tvnodes={}\tshare={:.2}%",
            node.id,
            node.address,
            node.weight,
            vnodes.get(&node.id).copied().unwrap_or(0),
            ownership.get(&node.id).copied().unwrap_or(0.0) * 100.0
        )?;
    }
    Ok(())
}

fn rebalance(
    config: &RingConfig,
    add: Option<Node>,
    remove: Option<&str>,
    sample: usize,
    out: &mut impl Write,
) -> CommandResult {
    let manager = manager(config)?;
    let keys: Vec<String> = (0..sample).map(|i| format!("key-{i}")).collect();
    let before = assign(&manager, &keys)?;
    let weight_before: u32 = manager.nodes().iter().map(|n| n.weight).sum();

    let ideal = if let Some(node) = add {
        let weight = node.weight;
        manager.add_node(node)?;
        f64::from(weight) / f64::from(weight_before + weight)
    } else if let Some(id) = remove {
        let removed = manager.remove_node(&NodeId::from(id))?;
        f64::from(removed.weight) / f64::from(weight_before)
    } else {
        bail!("nothing to rebalance: pass --add or --remove");
    };
    let after = assign(&manager, &keys)?;

    let mut flows: BTreeMap<(&NodeId, &NodeId), usize> = BTreeMap::new();
    for (old, new) in before.iter().zip(&after) {
        if old != new {
            *flows.entry((old, new)).or_default() += 1;
        }
    }
    let moved: usize = flows.values().sum();
    let fraction = if sample == 0 {
        0.0
    } else {
        moved as f64 / sample as f64
    };

    writeln!(
        out,
        "moved {moved}/{sample} keys ({:.2}%), ideal {:.2}%",
        fraction * 100.0,
        ideal * 100.0
    )?;
    for ((from, to), count) in flows {
        writeln!(out, "  {from} -> {to}: {count}")?;
    }
    Ok(())
}

fn assign(manager: &RingManager, keys: &[String]) -> anyhow::Result<Vec<NodeId>> {
    keys.iter()
        .map(|k| -> anyhow::Result<NodeId> { Ok(manager.select(k)?.id.clone()) })
        .collect()
}

async fn probe(
    config: &RingConfig,
    down: &[String],
    rounds: u32,
    out: &mut impl Write,
) -> CommandResult {
    let connector = Arc::new(MemoryConnector::new());
    for id in down {
        let Some(node) = config.nodes.iter().find(|n| n.id.as_str() == id.as_str()) else {
            bail!("unknown node {id}");
        };
        connector.set_reachable(node, false);
    }

    let router = CacheRouter::from_config(config, connector)?;
    router.start();
    let interval = config.health.to_health_config().interval;
    tokio::time::sleep(interval * rounds).await;
    let status = router.status();
    router.shutdown().await;

    for (id, health) in status {
        writeln!(
            out,
            "{id}\t{}\tconsecutive_failures={}",
            if health.alive { "alive" } else { "down" },
            health.consecutive_failures
        )?;
    }
    Ok(())
}

/// Parse `id=<id>,address=<addr>[,weight=<n>]`.
pub fn parse_node(s: &str) -> Result<Node, String> {
    let mut id = None;
    let mut address = None;
    let mut weight = 1u32;
    for part in s.split(',') {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| format!("expected key=value, got `{part}`"))?;
        match key.trim() {
            "id" => id = Some(value.trim().to_owned()),
            "address" => address = Some(value.trim().to_owned()),
            "weight" => {
                weight = value
                    .trim()
                    .parse()
                    .map_err(|e| format!("bad weight `{value}`: {e}"))?
            }
            other => return Err(format!("unknown field `{other}`")),
        }
    }
    let node = Node::new(
        id.ok_or("missing id")?,
        address.ok_or("missing address")?,
        weight,
    );
    node.validate().map_err(|e| e.to_string())?;
    Ok(node)
}
