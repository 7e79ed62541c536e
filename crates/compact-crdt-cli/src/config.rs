//! CLI configuration.

use anyhow::{bail, Result};
use compact_crdt_core::NodeId;

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Replica identity used to stamp writes
    pub node_id: NodeId,

    /// Pretty-print JSON output
    pub pretty: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::random(),
            pretty: false,
        }
    }
}

impl CliConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `COMPACT_CRDT_NODE_ID`: Replica identity (random UUID if unset)
    /// - `COMPACT_CRDT_PRETTY`: `1`/`true`/`yes` or `0`/`false`/`no`
    ///
    /// # Errors
    ///
    /// Returns error if a variable holds an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        match lookup("COMPACT_CRDT_NODE_ID") {
            Some(id) if id.trim().is_empty() => bail!("COMPACT_CRDT_NODE_ID is empty"),
            Some(id) => config.node_id = NodeId::new(id.trim()),
            None => tracing::warn!(
                node_id = %config.node_id,
                "COMPACT_CRDT_NODE_ID not set; using a random node id"
            ),
        }

        if let Some(pretty) = lookup("COMPACT_CRDT_PRETTY") {
            config.pretty = match pretty.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => bail!("Invalid COMPACT_CRDT_PRETTY: {other:?}"),
            };
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_node_id_and_pretty() {
        let config = CliConfig::from_lookup(lookup(&[
            ("COMPACT_CRDT_NODE_ID", "laptop"),
            ("COMPACT_CRDT_PRETTY", "TRUE"),
        ]))
        .unwrap();

        assert_eq!(config.node_id, NodeId::new("laptop"));
        assert!(config.pretty);
    }

    #[test]
    fn missing_node_id_falls_back_to_random() {
        let first = CliConfig::from_lookup(lookup(&[])).unwrap();
        let second = CliConfig::from_lookup(lookup(&[])).unwrap();

        assert_ne!(first.node_id, second.node_id);
        assert!(!first.pretty);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(CliConfig::from_lookup(lookup(&[("COMPACT_CRDT_NODE_ID", "  ")])).is_err());
        assert!(CliConfig::from_lookup(lookup(&[
            ("COMPACT_CRDT_NODE_ID", "a"),
            ("COMPACT_CRDT_PRETTY", "maybe"),
        ]))
        .is_err());
    }
}
