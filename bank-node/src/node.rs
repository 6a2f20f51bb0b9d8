//! Node runtime
//!
//! Wires ledger, transport, snapshot engine, listeners and generator for one
//! node and owns their lifecycle.

use crate::{
    config::{NodeConfig, Topology},
    generator::TransactionGenerator,
    handler::NodeHandler,
    Error, Result,
};
use ledger_core::{Ledger, NodeId};
use message_bus::{Listener, Transport};
use snapshot::{Collector, SnapshotEngine, SnapshotId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// How long shutdown waits for listener and generator tasks
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running bank node
#[derive(Debug)]
pub struct BankNode {
    node: NodeId,
    ports: Vec<u16>,
    ledger: Arc<Ledger>,
    transport: Arc<Transport>,
    engine: Arc<SnapshotEngine>,
    collector: Option<Arc<Collector>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl BankNode {
    /// Bind every listener and start the generator
    ///
    /// Fails if the node is not in the topology or a port cannot be bound.
    pub async fn start(config: NodeConfig, topology: Topology) -> Result<Self> {
        config.ledger.validate()?;
        topology.validate()?;

        let node = config.node_id;
        let entry = topology
            .node(node)
            .ok_or_else(|| Error::Config(format!("node {} not in topology", node)))?;
        let layout = topology
            .layout(node)
            .ok_or_else(|| Error::Config(format!("node {} not in topology", node)))?;
        let ports = topology.listen_ports(node)?;

        let ledger = Arc::new(Ledger::new(config.ledger.initial_balance));
        let transport = Arc::new(
            Transport::new(node, topology.peers()).with_bind_host(config.bind_host.clone()),
        );

        let collector = (topology.collector == node)
            .then(|| Arc::new(Collector::new(topology.node_count())));

        let mut engine = SnapshotEngine::new(
            node,
            entry.neighbors.clone(),
            topology.collector,
            ledger.clone(),
            transport.clone(),
        );
        if let Some(collector) = &collector {
            engine = engine.with_collector(collector.clone());
        }
        let engine = Arc::new(engine);

        let handler = Arc::new(NodeHandler::new(
            layout,
            config.ledger.amounts,
            engine.clone(),
            collector.clone(),
        ));

        let (shutdown, stop) = watch::channel(false);
        let mut tasks = Vec::with_capacity(ports.len() + 1);

        for port in &ports {
            let inbound = match transport.listen(*port).await {
                Ok(inbound) => inbound,
                Err(e) => {
                    // release the ports bound so far
                    let _ = shutdown.send(true);
                    for task in tasks {
                        let _ = task.await;
                    }
                    return Err(e.into());
                }
            };

            let listener = Listener::new(inbound, stop.clone());
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = listener.run(handler).await {
                    error!(%node, "Listener failed: {}", e);
                }
            }));
        }

        if config.generator.enabled {
            let generator = TransactionGenerator::new(
                engine.clone(),
                transport.clone(),
                config.ledger.amounts,
                config.generator.clone(),
            );
            tasks.push(tokio::spawn(generator.run(stop.clone())));
        }

        info!(
            %node,
            balance = ledger.balance(),
            neighbors = ?entry.neighbors,
            ?ports,
            collector = collector.is_some(),
            "Bank node started"
        );

        Ok(Self {
            node,
            ports,
            ledger,
            transport,
            engine,
            collector,
            shutdown,
            tasks,
        })
    }

    /// Node index
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Ports this node listens on
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Local ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Snapshot engine
    pub fn engine(&self) -> &Arc<SnapshotEngine> {
        &self.engine
    }

    /// Report collector, on the collector node only
    pub fn collector(&self) -> Option<&Arc<Collector>> {
        self.collector.as_ref()
    }

    /// Start a snapshot from this node
    pub async fn trigger_snapshot(&self) -> Result<SnapshotId> {
        Ok(self.engine.initiate().await?)
    }

    /// Stop listeners and generator, then close every connection
    pub async fn shutdown(self) {
        info!(node = %self.node, "Shutting down bank node");
        let _ = self.shutdown.send(true);

        let join = join_tasks(self.tasks);
        if tokio::time::timeout(SHUTDOWN_GRACE, join).await.is_err() {
            warn!(node = %self.node, "Tasks did not stop before timeout");
        }

        self.transport.close_all().await;
        info!(node = %self.node, balance = self.ledger.balance(), "Bank node stopped");
    }
}

async fn join_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            error!("Node task panicked: {}", e);
        }
    }
}
