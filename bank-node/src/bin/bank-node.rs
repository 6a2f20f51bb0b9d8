//! Bank Node Binary
//!
//! Runs one node of the bank network until interrupted.

use anyhow::Context;
use bank_node::{BankNode, NodeConfig, Topology};
use clap::Parser;
use ledger_core::NodeId;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "bank-node")]
#[command(about = "Bank network node with distributed snapshots", long_about = None)]
struct Cli {
    /// Index of this node in the topology
    #[arg(short, long)]
    node: Option<i32>,

    /// Topology file (TOML)
    #[arg(short, long)]
    topology: Option<PathBuf>,

    /// Node config file (TOML); environment variables are used otherwise
    #[arg(short, long, env = "BANK_CONFIG")]
    config: Option<PathBuf>,

    /// Do not generate random transfers
    #[arg(long)]
    no_generator: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading config from: {}", path.display());
            NodeConfig::from_file(path)?
        }
        None => NodeConfig::from_env()?,
    };
    if let Some(node) = cli.node {
        config.node_id = NodeId::new(node);
    }
    if let Some(path) = cli.topology {
        config.topology_path = path;
    }
    if cli.no_generator {
        config.generator.enabled = false;
    }

    let topology = Topology::from_file(&config.topology_path)
        .with_context(|| format!("loading topology {}", config.topology_path.display()))?;

    info!(
        node = %config.node_id,
        nodes = topology.node_count(),
        collector = %topology.collector,
        "Starting bank node"
    );

    let node = BankNode::start(config, topology)
        .await
        .context("starting bank node")?;

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    node.shutdown().await;
    Ok(())
}
