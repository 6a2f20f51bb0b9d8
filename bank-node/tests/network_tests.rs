//! Three bank nodes on localhost exchanging random traffic
//!
//! Whatever moves between the nodes, every global state must add up to the
//! money the network started with.

use bank_node::{BankNode, GeneratorConfig, NodeConfig, NodeEntry, Topology};
use ledger_core::{LedgerConfig, NodeId};
use snapshot::GlobalState;
use std::time::Duration;
use tokio::sync::broadcast;

const INITIAL: i64 = 5_000_000;

/// Ports reserved per node: transfer and report ranges with room to spare
const NODE_STRIDE: u16 = 200;

/// Free port with room for every node's ports above it
fn free_base() -> u16 {
    loop {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        if port < 60_000 {
            return port;
        }
    }
}

fn topology() -> Topology {
    let base = free_base();
    let entry = |id: i32, neighbors: &[i32]| NodeEntry {
        id: NodeId::new(id),
        address: "127.0.0.1".to_string(),
        base_port: Some(base + NODE_STRIDE * id as u16),
        control_port: None,
        neighbors: neighbors.iter().map(|n| NodeId::new(*n)).collect(),
    };

    Topology {
        base_port: 5000,
        report_offset: 100,
        collector: NodeId::new(0),
        nodes: vec![entry(0, &[1, 2]), entry(1, &[0, 2]), entry(2, &[0, 1])],
    }
}

fn config(node: i32, generator: bool) -> NodeConfig {
    NodeConfig {
        node_id: NodeId::new(node),
        bind_host: "127.0.0.1".to_string(),
        ledger: LedgerConfig {
            initial_balance: INITIAL,
            ..LedgerConfig::default()
        },
        generator: GeneratorConfig {
            enabled: generator,
            min_sleep_ms: 2,
            sleep_span_ms: 10,
        },
        ..NodeConfig::default()
    }
}

async fn start_network(generator: bool) -> Vec<BankNode> {
    let topology = topology();
    let mut nodes = Vec::new();
    for id in 0..3 {
        nodes.push(
            BankNode::start(config(id, generator), topology.clone())
                .await
                .unwrap(),
        );
    }
    nodes
}

async fn next_state(events: &mut broadcast::Receiver<GlobalState>) -> GlobalState {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("global state in time")
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_of_quiet_network() {
    let nodes = start_network(false).await;
    let mut events = nodes[0].collector().unwrap().subscribe();

    let id = nodes[2].trigger_snapshot().await.unwrap();
    let state = next_state(&mut events).await;

    assert_eq!(state.snapshot, id);
    assert_eq!(state.reports.len(), 3);
    assert!(state.reports.iter().all(|r| r.balance == INITIAL));
    assert_eq!(state.in_flight, 0);
    assert_eq!(state.total, 3 * INITIAL);

    for node in nodes {
        assert!(node.engine().live_snapshots().is_empty());
        node.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshots_conserve_money_under_traffic() {
    let nodes = start_network(true).await;
    let mut events = nodes[0].collector().unwrap().subscribe();

    // let the generators get going
    tokio::time::sleep(Duration::from_millis(300)).await;

    // overlapping snapshots from two initiators
    let first = nodes[1].trigger_snapshot().await.unwrap();
    let second = nodes[0].trigger_snapshot().await.unwrap();
    assert_ne!(first, second);

    let mut states = vec![next_state(&mut events).await, next_state(&mut events).await];
    states.sort_by_key(|s| s.snapshot);

    let mut ids = vec![first, second];
    ids.sort();
    assert_eq!(states.iter().map(|s| s.snapshot).collect::<Vec<_>>(), ids);

    for state in &states {
        assert_eq!(state.reports.len(), 3);
        assert_eq!(state.total, 3 * INITIAL, "{}", state);
    }

    for node in nodes {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_bind_conflict_is_fatal() {
    let topology = topology();
    let first = BankNode::start(config(1, false), topology.clone())
        .await
        .unwrap();

    // same node twice: every port is taken
    let second = BankNode::start(config(1, false), topology).await;
    assert!(matches!(second, Err(bank_node::Error::Transport(_))));

    first.shutdown().await;
}

#[test]
fn test_node_port_ranges_do_not_overlap() {
    let topology = topology();
    let mut seen = std::collections::HashSet::new();
    for id in 0..3 {
        for port in topology.listen_ports(NodeId::new(id)).unwrap() {
            assert!(seen.insert(port), "port {} bound by two nodes", port);
        }
    }
}

#[tokio::test]
async fn test_unknown_node_rejected() {
    let result = BankNode::start(config(7, false), topology()).await;
    assert!(matches!(result, Err(bank_node::Error::Config(_))));
}
