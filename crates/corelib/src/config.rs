//! Startup configuration, parsed from JSON.
//!
//! ```json
//! {
//!   "replicas_per_weight": 10,
//!   "hash": "xxh3",
//!   "health": { "interval_ms": 1000, "failure_threshold": 3, "probe_timeout_ms": 500 },
//!   "nodes": [
//!     { "id": "cache-a", "address": "10.0.0.1:6379" },
//!     { "id": "cache-b", "address": "10.0.0.2:6379", "weight": 2 }
//!   ]
//! }
//! ```
//!
//! The ring is derived entirely from this file; nothing about the topology is
//! persisted between runs.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::HashKind;
use crate::health::HealthConfig;
use crate::node::Node;
use crate::ring::DEFAULT_REPLICAS_PER_WEIGHT;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RingConfig {
    /// Virtual nodes per unit of node weight.
    pub replicas_per_weight: u32,
    /// Hash function used for both keys and virtual nodes.
    pub hash: HashKind,
    pub health: HealthSection,
    /// Backends, in configuration order.
    pub nodes: Vec<Node>,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            replicas_per_weight: DEFAULT_REPLICAS_PER_WEIGHT,
            hash: HashKind::default(),
            health: HealthSection::default(),
            nodes: Vec::new(),
        }
    }
}

/// `health` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthSection {
    pub interval_ms: u64,
    pub failure_threshold: u32,
    pub probe_timeout_ms: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            failure_threshold: 3,
            probe_timeout_ms: 500,
        }
    }
}

impl HealthSection {
    pub fn to_health_config(&self) -> HealthConfig {
        HealthConfig {
            interval: Duration::from_millis(self.interval_ms),
            failure_threshold: self.failure_threshold,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }
}

impl RingConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: RingConfig =
            serde_json::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.replicas_per_weight == 0 {
            return Err(Error::InvalidConfig(
                "replicas_per_weight must be at least 1".into(),
            ));
        }
        if self.health.interval_ms == 0 {
            return Err(Error::InvalidConfig("health.interval_ms must be positive".into()));
        }
        if self.health.probe_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "health.probe_timeout_ms must be positive".into(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(Error::InvalidConfig(
                "health.failure_threshold must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            node.validate()
                .map_err(|e| Error::InvalidConfig(e.to_string()))?;
            if !seen.insert(&node.id) {
                return Err(Error::InvalidConfig(format!("duplicate node id {}", node.id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RingConfig::from_json_str("{}").unwrap();
        assert_eq!(config.replicas_per_weight, 10);
        assert_eq!(config.hash, HashKind::Xxh3);
        assert_eq!(config.health.failure_threshold, 3);
        assert!(config.nodes.is_empty());

        let health = config.health.to_health_config();
        assert_eq!(health.interval, Duration::from_secs(1));
        assert_eq!(health.probe_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_full_document() {
        let config = RingConfig::from_json_str(
            r#"{
                "replicas_per_weight": 40,
                "hash": "siphash",
                "health": { "interval_ms": 250, "failure_threshold": 5 },
                "nodes": [
                    { "id": "a", "address": "10.0.0.1:6379" },
                    { "id": "b", "address": "10.0.0.2:6379", "weight": 3 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.replicas_per_weight, 40);
        assert_eq!(config.hash, HashKind::Siphash);
        assert_eq!(config.health.interval_ms, 250);
        assert_eq!(config.health.probe_timeout_ms, 500);
        assert_eq!(
            config.nodes,
            vec![
                Node::new("a", "10.0.0.1:6379", 1),
                Node::new("b", "10.0.0.2:6379", 3)
            ]
        );
    }

    #[test]
    fn test_rejects_invalid() {
        for doc in [
            r#"{"replicas_per_weight": 0}"#,
            r#"{"health": {"failure_threshold": 0}}"#,
            r#"{"health": {"interval_ms": 0}}"#,
            r#"{"nodes": [{"id": "a", "address": "x", "weight": 0}]}"#,
            r#"{"nodes": [{"id": "", "address": "x"}]}"#,
            r#"{"nodes": [{"id": "a", "address": "x"}, {"id": "a", "address": "y"}]}"#,
            r#"{"replicas": 10}"#,
            r#"not json"#,
        ] {
            assert!(
                matches!(RingConfig::from_json_str(doc), Err(Error::InvalidConfig(_))),
                "accepted {doc}"
            );
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            RingConfig::from_path("/definitely/not/here.json"),
            Err(Error::InvalidConfig(_))
        ));
    }
}
