//! Configuration for a bank node
//!
//! Two files: the [`Topology`] shared by every node of the network, and the
//! per-process [`NodeConfig`].
//!
//! ```toml
//! base_port = 5000
//! report_offset = 100
//! collector = 0
//!
//! [[nodes]]
//! id = 0
//! address = "10.0.1.10"
//! control_port = 5555
//! neighbors = [1, 2]
//! ```

use ledger_core::{LedgerConfig, NodeId};
use message_bus::{transport::Peer, PortLayout};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// One node of the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Node index
    pub id: NodeId,

    /// Host name or IP address peers connect to
    pub address: String,

    /// Overrides the network-wide base port (several nodes on one host)
    #[serde(default)]
    pub base_port: Option<u16>,

    /// Extra port accepting operator snapshot triggers
    #[serde(default)]
    pub control_port: Option<u16>,

    /// Nodes this one exchanges transfers and markers with
    #[serde(default)]
    pub neighbors: Vec<NodeId>,
}

/// Network topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// First transfer port of every node without its own `base_port`
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Distance from a node's base port to its first report port
    #[serde(default = "default_report_offset")]
    pub report_offset: u16,

    /// Node aggregating snapshot reports
    #[serde(default)]
    pub collector: NodeId,

    /// Every node, indexed 0..n
    pub nodes: Vec<NodeEntry>,
}

fn default_base_port() -> u16 {
    PortLayout::default().base_port
}

fn default_report_offset() -> u16 {
    PortLayout::default().report_offset
}

impl Topology {
    /// Load and validate a TOML topology file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::Config(format!("Cannot read topology {}: {}", path.display(), e))
        })?;
        content.parse()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Entry of `id`
    pub fn node(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.iter().find(|entry| entry.id == id)
    }

    /// Port layout of `id`'s listeners
    pub fn layout(&self, id: NodeId) -> Option<PortLayout> {
        let entry = self.node(id)?;
        Some(PortLayout::new(
            entry.base_port.unwrap_or(self.base_port),
            self.report_offset,
        ))
    }

    /// Address book for the transport
    pub fn peers(&self) -> HashMap<NodeId, Peer> {
        self.nodes
            .iter()
            .map(|entry| {
                let ports = PortLayout::new(
                    entry.base_port.unwrap_or(self.base_port),
                    self.report_offset,
                );
                (
                    entry.id,
                    Peer {
                        address: entry.address.clone(),
                        ports,
                    },
                )
            })
            .collect()
    }

    /// Every port `id` has to bind
    ///
    /// One transfer port per neighbor, one report port per node on the
    /// collector, and the control port if configured.
    pub fn listen_ports(&self, id: NodeId) -> crate::Result<Vec<u16>> {
        let entry = self
            .node(id)
            .ok_or_else(|| crate::Error::Config(format!("node {} not in topology", id)))?;
        let layout = self
            .layout(id)
            .ok_or_else(|| crate::Error::Config(format!("node {} not in topology", id)))?;

        let mut ports = Vec::new();
        for neighbor in &entry.neighbors {
            ports.push(layout.transfer_port(*neighbor).ok_or_else(|| {
                crate::Error::Config(format!("transfer port for {} on {} overflows", neighbor, id))
            })?);
        }

        if id == self.collector {
            for sender in &self.nodes {
                ports.push(layout.report_port(sender.id).ok_or_else(|| {
                    crate::Error::Config(format!("report port for {} overflows", sender.id))
                })?);
            }
        }

        ports.extend(entry.control_port);
        Ok(ports)
    }

    /// Reject topologies the snapshot algorithm cannot run on
    pub fn validate(&self) -> crate::Result<()> {
        if self.nodes.is_empty() {
            return Err(crate::Error::Config("topology has no nodes".to_string()));
        }

        let count = self.node_count();
        if usize::from(self.report_offset) < count {
            return Err(crate::Error::Config(format!(
                "report_offset {} is smaller than the node count {}",
                self.report_offset, count
            )));
        }

        let mut seen = HashSet::new();
        for entry in &self.nodes {
            let index = entry.id.index();
            if index < 0 || index as usize >= count {
                return Err(crate::Error::Config(format!(
                    "node id {} outside 0..{}",
                    entry.id, count
                )));
            }
            if !seen.insert(entry.id) {
                return Err(crate::Error::Config(format!("duplicate node id {}", entry.id)));
            }
        }

        if self.node(self.collector).is_none() {
            return Err(crate::Error::Config(format!(
                "collector {} is not a node",
                self.collector
            )));
        }

        for entry in &self.nodes {
            for neighbor in &entry.neighbors {
                if *neighbor == entry.id {
                    return Err(crate::Error::Config(format!(
                        "node {} lists itself as neighbor",
                        entry.id
                    )));
                }
                let other = self.node(*neighbor).ok_or_else(|| {
                    crate::Error::Config(format!(
                        "node {} has unknown neighbor {}",
                        entry.id, neighbor
                    ))
                })?;
                // markers and refunds flow both ways on every link
                if !other.neighbors.contains(&entry.id) {
                    return Err(crate::Error::Config(format!(
                        "link {} -> {} is not mirrored",
                        entry.id, neighbor
                    )));
                }
            }

            if let (Some(port), Some(layout)) = (entry.control_port, self.layout(entry.id)) {
                if layout.classify(port).is_some() {
                    return Err(crate::Error::Config(format!(
                        "control port {} of node {} overlaps channel ports",
                        port, entry.id
                    )));
                }
            }

            self.listen_ports(entry.id)?;
        }

        Ok(())
    }
}

impl FromStr for Topology {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let topology: Topology = toml::from_str(s)
            .map_err(|e| crate::Error::Config(format!("Failed to parse topology: {}", e)))?;
        topology.validate()?;
        Ok(topology)
    }
}

/// Transaction generator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Run the generator at all
    pub enabled: bool,

    /// Shortest pause between rounds (ms)
    pub min_sleep_ms: u64,

    /// Pause is drawn from `[min_sleep_ms, min_sleep_ms + sleep_span_ms)`
    pub sleep_span_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_sleep_ms: 2_000,
            sleep_span_ms: 45_000,
        }
    }
}

/// Per-process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Index of this node in the topology
    pub node_id: NodeId,

    /// Topology file
    pub topology_path: PathBuf,

    /// Interface listeners bind to
    pub bind_host: String,

    /// Account settings
    pub ledger: LedgerConfig,

    /// Generator settings
    pub generator: GeneratorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new(0),
            topology_path: PathBuf::from("config/nodes.toml"),
            bind_host: "0.0.0.0".to_string(),
            ledger: LedgerConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.ledger.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = NodeConfig::default();

        if let Ok(node_id) = std::env::var("BANK_NODE_ID") {
            let index: i32 = node_id
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid BANK_NODE_ID: {}", e)))?;
            config.node_id = NodeId::new(index);
        }

        if let Ok(path) = std::env::var("BANK_TOPOLOGY") {
            config.topology_path = PathBuf::from(path);
        }

        if let Ok(balance) = std::env::var("BANK_INITIAL_BALANCE") {
            config.ledger.initial_balance = balance
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid BANK_INITIAL_BALANCE: {}", e)))?;
        }

        config.ledger.validate()?;
        Ok(config)
    }
}
