//! Snapshot engine tests against in-process channels
//!
//! `Loopback` hands out detached channels, so every message the engine
//! queues can be inspected in order per route.

use async_trait::async_trait;
use ledger_core::{Ledger, NodeId};
use message_bus::{Connector, Message, MessageType, OutboundChannel, Route};
use parking_lot::Mutex;
use proptest::prelude::*;
use snapshot::{
    ChannelEntry, Collector, MarkerOutcome, NodeReport, SnapshotEngine, SnapshotId,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct Loopback {
    channels: Mutex<HashMap<Route, OutboundChannel>>,
    receivers: Mutex<HashMap<Route, mpsc::UnboundedReceiver<Message>>>,
    unreachable: HashSet<NodeId>,
}

impl Loopback {
    fn unreachable(nodes: &[i32]) -> Self {
        Self {
            unreachable: nodes.iter().map(|n| NodeId::new(*n)).collect(),
            ..Self::default()
        }
    }

    /// Everything queued on `route` since the last drain
    fn drain(&self, route: Route) -> Vec<Message> {
        let mut receivers = self.receivers.lock();
        let mut messages = Vec::new();
        if let Some(rx) = receivers.get_mut(&route) {
            while let Ok(message) = rx.try_recv() {
                messages.push(message);
            }
        }
        messages
    }

    fn markers_to(&self, node: i32) -> Vec<i64> {
        self.drain(Route::transfer(NodeId::new(node)))
            .into_iter()
            .filter(|m| m.message_type == MessageType::Marker)
            .map(|m| m.num_data)
            .collect()
    }
}

#[async_trait]
impl Connector for Loopback {
    async fn connect_to(&self, route: Route) -> message_bus::Result<OutboundChannel> {
        if self.unreachable.contains(&route.target) {
            return Err(message_bus::Error::Connection(format!("{} unreachable", route)));
        }

        let mut channels = self.channels.lock();
        if let Some(channel) = channels.get(&route) {
            return Ok(channel.clone());
        }
        let (channel, rx) = OutboundChannel::detached(route);
        channels.insert(route, channel.clone());
        self.receivers.lock().insert(route, rx);
        Ok(channel)
    }
}

fn ids(nodes: &[i32]) -> Vec<NodeId> {
    nodes.iter().map(|n| NodeId::new(*n)).collect()
}

fn engine(node: i32, neighbors: &[i32], balance: i64, loopback: &Arc<Loopback>) -> SnapshotEngine {
    SnapshotEngine::new(
        NodeId::new(node),
        ids(neighbors),
        NodeId::new(0),
        Arc::new(Ledger::new(balance)),
        loopback.clone(),
    )
}

fn reports_sent(loopback: &Loopback) -> Vec<NodeReport> {
    loopback
        .drain(Route::report(NodeId::new(0)))
        .into_iter()
        .map(|m| {
            assert_eq!(m.message_type, MessageType::GlobalState);
            NodeReport::from_payload(m.str_data.as_deref().unwrap()).unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_debit_in_flight_before_marker_is_logged() {
    let loopback = Arc::new(Loopback::default());
    let collector = Arc::new(Collector::new(3));
    let a = engine(0, &[1, 2], 5_000_000, &loopback).with_collector(collector.clone());

    let id = a.initiate().await.unwrap();
    assert_eq!(loopback.markers_to(1), vec![id.raw()]);
    assert_eq!(loopback.markers_to(2), vec![id.raw()]);

    // B's DEBIT was sent before B saw A's marker
    assert!(a.on_debit(NodeId::new(1), 20_000).await.unwrap());
    assert_eq!(a.ledger().balance(), 4_980_000);

    let refund = loopback.drain(Route::transfer(NodeId::new(1)));
    assert_eq!(refund, vec![Message::credit(NodeId::new(0), 20_000)]);

    let outcome = a.on_marker(NodeId::new(1), id).await.unwrap();
    assert_eq!(
        outcome,
        MarkerOutcome::Closed {
            snapshot: id,
            remaining: 1
        }
    );

    let MarkerOutcome::Completed(report) = a.on_marker(NodeId::new(2), id).await.unwrap() else {
        panic!("snapshot should complete after the last marker");
    };
    assert_eq!(report.balance, 5_000_000);
    assert_eq!(
        report.channel(NodeId::new(1)),
        Some(&[ChannelEntry::debit(20_000)][..])
    );
    assert_eq!(report.net_recorded(), -20_000);
    assert_eq!(report.channel(NodeId::new(2)), Some(&[][..]));

    // collector is local, nothing goes over the report route
    assert!(reports_sent(&loopback).is_empty());
    assert_eq!(collector.pending(), vec![id]);
}

#[tokio::test]
async fn test_transfer_after_marker_not_counted() {
    let loopback = Arc::new(Loopback::default());
    let node = engine(1, &[0, 2], 1_000_000, &loopback);
    let id = SnapshotId::new(NodeId::new(0), 0);

    assert_eq!(
        node.on_marker(NodeId::new(0), id).await.unwrap(),
        MarkerOutcome::Started(id)
    );
    assert_eq!(loopback.markers_to(0), vec![id.raw()]);
    assert_eq!(loopback.markers_to(2), vec![id.raw()]);

    // channel from 0 is closed, channel from 2 still records
    assert_eq!(node.on_credit(NodeId::new(0), 10_000), 0);
    assert_eq!(node.on_credit(NodeId::new(2), 30_000), 1);
    assert_eq!(node.ledger().balance(), 1_040_000);

    assert!(matches!(
        node.on_marker(NodeId::new(2), id).await.unwrap(),
        MarkerOutcome::Completed(_)
    ));

    let reports = reports_sent(&loopback);
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].balance, 1_000_000);
    assert_eq!(reports[0].channel(NodeId::new(0)), Some(&[][..]));
    assert_eq!(
        reports[0].channel(NodeId::new(2)),
        Some(&[ChannelEntry::credit(30_000)][..])
    );
    assert_eq!(reports[0].in_flight(), 30_000);
}

#[tokio::test]
async fn test_late_marker_does_not_resurrect() {
    let loopback = Arc::new(Loopback::default());
    let node = engine(2, &[1], 500, &loopback);
    let id = SnapshotId::new(NodeId::new(1), 3);

    assert!(matches!(
        node.on_marker(NodeId::new(1), id).await.unwrap(),
        MarkerOutcome::Completed(_)
    ));
    assert!(node.is_finished(id));
    assert_eq!(loopback.markers_to(1), vec![id.raw()]);

    assert_eq!(
        node.on_marker(NodeId::new(1), id).await.unwrap(),
        MarkerOutcome::Ignored
    );
    assert!(node.live_snapshots().is_empty());
    assert!(loopback.markers_to(1).is_empty());
    assert_eq!(reports_sent(&loopback).len(), 1);
}

#[tokio::test]
async fn test_foreign_and_unknown_markers_ignored() {
    let loopback = Arc::new(Loopback::default());
    let node = engine(1, &[0], 500, &loopback);

    // not a neighbor
    let outcome = node
        .on_marker(NodeId::new(7), SnapshotId::new(NodeId::new(7), 0))
        .await
        .unwrap();
    assert_eq!(outcome, MarkerOutcome::Ignored);

    // our own id that was never allocated
    let outcome = node
        .on_marker(NodeId::new(0), SnapshotId::new(NodeId::new(1), 9))
        .await
        .unwrap();
    assert_eq!(outcome, MarkerOutcome::Ignored);
    assert!(node.live_snapshots().is_empty());
}

#[tokio::test]
async fn test_external_marker_initiates() {
    let loopback = Arc::new(Loopback::default());
    let node = engine(1, &[0, 2], 500, &loopback);

    let MarkerOutcome::Initiated(first) = node
        .on_marker(NodeId::EXTERNAL, SnapshotId::from_raw(0))
        .await
        .unwrap()
    else {
        panic!("external marker should initiate");
    };
    let second = node.initiate().await.unwrap();

    assert_eq!(first.initiator(), NodeId::new(1));
    assert!(second > first);
    assert_eq!(node.live_snapshots(), vec![first, second]);
    assert_eq!(loopback.markers_to(2), vec![first.raw(), second.raw()]);
}

#[tokio::test]
async fn test_overlapping_snapshots_are_independent() {
    let loopback = Arc::new(Loopback::default());
    let node = engine(1, &[0, 2], 100, &loopback);
    let x = SnapshotId::new(NodeId::new(0), 0);
    let y = SnapshotId::new(NodeId::new(2), 0);

    node.on_marker(NodeId::new(0), x).await.unwrap();
    node.on_marker(NodeId::new(2), y).await.unwrap();

    // 0 -> 1 closed for x only, 2 -> 1 closed for y only
    assert_eq!(node.on_credit(NodeId::new(0), 5), 1);
    assert_eq!(node.on_credit(NodeId::new(2), 7), 1);

    node.on_marker(NodeId::new(2), x).await.unwrap();
    node.on_marker(NodeId::new(0), y).await.unwrap();

    let mut reports = reports_sent(&loopback);
    reports.sort_by_key(|r| r.snapshot);
    assert_eq!(reports.len(), 2);

    let (rx, ry) = (&reports[0], &reports[1]);
    assert_eq!(rx.snapshot, x);
    assert_eq!(rx.balance, 100);
    assert_eq!(rx.channel(NodeId::new(2)), Some(&[ChannelEntry::credit(7)][..]));
    assert_eq!(ry.snapshot, y);
    assert_eq!(ry.balance, 100);
    assert_eq!(ry.channel(NodeId::new(0)), Some(&[ChannelEntry::credit(5)][..]));
}

#[tokio::test]
async fn test_insufficient_funds_debit_still_logged() {
    let loopback = Arc::new(Loopback::default());
    let node = engine(1, &[0], 5_000_000, &loopback);
    let id = node.initiate().await.unwrap();
    loopback.markers_to(0);

    assert!(!node.on_debit(NodeId::new(0), 6_000_000).await.unwrap());
    assert_eq!(node.ledger().balance(), 5_000_000);
    assert!(loopback.drain(Route::transfer(NodeId::new(0))).is_empty());

    let MarkerOutcome::Completed(report) = node.on_marker(NodeId::new(0), id).await.unwrap() else {
        panic!("single channel should complete");
    };
    assert_eq!(
        report.channel(NodeId::new(0)),
        Some(&[ChannelEntry::debit(6_000_000)][..])
    );
    assert_eq!(report.in_flight(), 0);
}

#[tokio::test]
async fn test_unreachable_neighbor_does_not_block_propagation() {
    let loopback = Arc::new(Loopback::unreachable(&[2]));
    let node = engine(0, &[1, 2], 10, &loopback);

    let id = node.initiate().await.unwrap();
    assert_eq!(loopback.markers_to(1), vec![id.raw()]);
    assert_eq!(node.live_snapshots(), vec![id]);
}

/// Every connect takes `delay` before reaching the loopback
struct Delayed {
    inner: Arc<Loopback>,
    delay: Duration,
}

#[async_trait]
impl Connector for Delayed {
    async fn connect_to(&self, route: Route) -> message_bus::Result<OutboundChannel> {
        tokio::time::sleep(self.delay).await;
        self.inner.connect_to(route).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_neighbor_connects_run_concurrently() {
    let loopback = Arc::new(Loopback::default());
    let delayed = Arc::new(Delayed {
        inner: loopback.clone(),
        delay: Duration::from_secs(1),
    });
    let node = SnapshotEngine::new(
        NodeId::new(0),
        ids(&[1, 2, 3]),
        NodeId::new(0),
        Arc::new(Ledger::new(100)),
        delayed,
    );

    let start = tokio::time::Instant::now();
    let id = node.initiate().await.unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));

    for neighbor in 1..=3 {
        assert_eq!(loopback.markers_to(neighbor), vec![id.raw()]);
    }
}

#[tokio::test]
async fn test_atomically_sees_consistent_ledger() {
    let loopback = Arc::new(Loopback::default());
    let node = engine(0, &[1], 100, &loopback);
    let channel = loopback.connect_to(Route::transfer(NodeId::new(1))).await.unwrap();

    let sent = node.atomically(|ledger| {
        if !ledger.debit(60) {
            return false;
        }
        channel.enqueue(Message::credit(NodeId::new(0), 60)).is_ok()
    });
    assert!(sent);

    let skipped = node.atomically(|ledger| ledger.debit(60));
    assert!(!skipped);
    assert_eq!(node.ledger().balance(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_first_markers_start_once() {
    for _ in 0..50 {
        let loopback = Arc::new(Loopback::default());
        let node = Arc::new(engine(3, &[0, 1, 2], 1_000, &loopback));
        let id = SnapshotId::new(NodeId::new(0), 0);

        let tasks: Vec<_> = [0, 1]
            .into_iter()
            .map(|from| {
                let node = node.clone();
                tokio::spawn(async move { node.on_marker(NodeId::new(from), id).await.unwrap() })
            })
            .collect();

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }

        let started = outcomes
            .iter()
            .filter(|o| matches!(o, MarkerOutcome::Started(_)))
            .count();
        assert_eq!(started, 1);

        // exactly one propagation burst
        for neighbor in [0, 1, 2] {
            assert_eq!(loopback.markers_to(neighbor), vec![id.raw()]);
        }
        assert_eq!(node.live_snapshots(), vec![id]);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_markers_in_any_order_complete_once(
        order in (1usize..6).prop_flat_map(|k| Just((0..k as i32).map(|i| i + 1).collect::<Vec<_>>()).prop_shuffle()),
        repeats in prop::collection::vec(any::<bool>(), 6),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let loopback = Arc::new(Loopback::default());
            let mut neighbors = order.clone();
            neighbors.sort();
            let node = engine(0, &neighbors, 1_000, &loopback);
            let id = SnapshotId::new(NodeId::new(9), 4);

            let mut completed = 0;
            for (i, from) in order.iter().enumerate() {
                let from = NodeId::new(*from);
                if let MarkerOutcome::Completed(report) = node.on_marker(from, id).await.unwrap() {
                    completed += 1;
                    prop_assert_eq!(i, order.len() - 1);
                    prop_assert_eq!(report.channels.len(), order.len());
                }

                // duplicate markers on a closed channel change nothing
                if repeats[i] {
                    prop_assert_eq!(node.on_marker(from, id).await.unwrap(), MarkerOutcome::Ignored);
                }
            }

            prop_assert_eq!(completed, 1);
            prop_assert!(node.is_finished(id));
            prop_assert_eq!(reports_sent(&loopback).len(), 1);
            Ok(())
        })?;
    }
}
