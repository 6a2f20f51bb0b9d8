//! Point-to-point TCP transport with a lazy connection cache
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────┐   enqueue (sync, ordered)   ┌──────────────────┐
//! │ generator / listeners │ ──────────────────────────► │ OutboundChannel  │
//! └───────────────────────┘                             │  (mpsc sender)   │
//!                                                       └────────┬─────────┘
//!                                                                │
//!                                                                ▼
//!                                                       ┌──────────────────┐
//!                                                       │  writer task     │
//!                                                       │  one per Route   │
//!                                                       │  TcpStream lines │
//!                                                       └──────────────────┘
//! ```
//!
//! Opening a connection is async, but pushing onto an open one is not: the
//! snapshot engine relies on that to order markers and transfers on a
//! channel while it holds its own lock.

use crate::{
    listener::Inbound,
    message::Message,
    metrics::{MESSAGE_SEND_TOTAL, OPEN_CONNECTIONS},
    routing::{PortLayout, Route},
    Error, Result,
};
use async_trait::async_trait;
use ledger_core::NodeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Where a peer node can be reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Host name or IP address
    pub address: String,

    /// Port layout of the peer's listeners
    pub ports: PortLayout,
}

/// Opens outbound channels
///
/// Implemented by [`Transport`]; tests substitute in-process channels.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Return the cached channel for `route`, opening it on first use
    async fn connect_to(&self, route: Route) -> Result<OutboundChannel>;

    /// Connect (if needed) and enqueue one message
    async fn send(&self, route: Route, message: Message) -> Result<()> {
        self.connect_to(route).await?.enqueue(message)
    }
}

/// Handle to one outbound channel
///
/// Cloning is cheap; every clone feeds the same ordered queue.
#[derive(Debug, Clone)]
pub struct OutboundChannel {
    route: Route,
    tx: mpsc::UnboundedSender<Message>,
}

impl OutboundChannel {
    /// Channel not backed by a socket; the receiver sees messages in order
    pub fn detached(route: Route) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { route, tx }, rx)
    }

    /// Route this channel serves
    pub fn route(&self) -> Route {
        self.route
    }

    /// Queue a message behind everything already queued on this channel
    pub fn enqueue(&self, message: Message) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::ChannelClosed(self.route.to_string()))
    }

    /// True once the writer behind this channel has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Cache slot of one route; locked only while that route connects
type Slot = Arc<Mutex<Option<OutboundChannel>>>;

/// TCP transport of one node
#[derive(Debug)]
pub struct Transport {
    /// Node this transport sends as
    local: NodeId,

    /// Address book of every node we may talk to
    peers: HashMap<NodeId, Peer>,

    /// Interface listeners bind to
    bind_host: String,

    /// Timeout for opening a connection
    connect_timeout: Duration,

    /// Cached outbound channels, one slot per route
    connections: parking_lot::Mutex<HashMap<Route, Slot>>,

    /// Writer tasks, awaited on shutdown
    writers: parking_lot::Mutex<Vec<JoinHandle<()>>>,

    /// Set by `close_all`
    closed: AtomicBool,
}

impl Transport {
    /// Create new transport
    pub fn new(local: NodeId, peers: HashMap<NodeId, Peer>) -> Self {
        Self {
            local,
            peers,
            bind_host: "0.0.0.0".to_string(),
            connect_timeout: Duration::from_secs(5),
            connections: parking_lot::Mutex::new(HashMap::new()),
            writers: parking_lot::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Bind listeners on a specific interface
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Number of cached outbound connections
    pub async fn connection_count(&self) -> usize {
        let slots: Vec<Slot> = self.connections.lock().values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Bind a receiver on `port`
    ///
    /// Bind failure is returned to the caller; for a configured node port
    /// it is fatal.
    pub async fn listen(&self, port: u16) -> Result<Inbound> {
        let listener = TcpListener::bind((self.bind_host.as_str(), port))
            .await
            .map_err(|source| Error::Bind { port, source })?;

        info!(node = %self.local, port, "Start listening");
        Inbound::spawn(listener)
    }

    /// Close every cached connection and wait for queued messages to drain
    ///
    /// Safe to call more than once.
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let slots: Vec<_> = self.connections.lock().drain().collect();

        // waits for connects still in progress
        let mut drained = Vec::with_capacity(slots.len());
        for (route, slot) in slots {
            if slot.lock().await.take().is_some() {
                drained.push(route);
            }
        }
        OPEN_CONNECTIONS.sub(drained.len() as i64);

        let writers: Vec<_> = std::mem::take(&mut *self.writers.lock());
        if writers.is_empty() {
            return;
        }

        debug!(node = %self.local, count = writers.len(), "Waiting for writers to drain");
        let join = futures::future::join_all(writers);
        if tokio::time::timeout(self.connect_timeout, join).await.is_err() {
            warn!(node = %self.local, "Writers did not drain before timeout");
        }

        info!(node = %self.local, routes = ?drained, "Closed outbound connections");
    }

    fn slot(&self, route: Route) -> Slot {
        self.connections.lock().entry(route).or_default().clone()
    }

    async fn open(&self, route: Route) -> Result<OutboundChannel> {
        let peer = self
            .peers
            .get(&route.target)
            .ok_or(Error::UnknownNode(route.target))?;

        let port = peer.ports.port_for(route.kind, self.local).ok_or_else(|| {
            Error::Connection(format!("no {} port for sender {}", route, self.local))
        })?;
        let addr = format!("{}:{}", peer.address, port);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::Connection(format!("connect to {} timed out", addr)))?
            .map_err(|e| Error::Connection(format!("connect to {} failed: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        debug!(node = %self.local, %route, %addr, "Connected");

        let (channel, rx) = OutboundChannel::detached(route);
        let writer = tokio::spawn(write_loop(route, stream, rx));
        self.writers.lock().push(writer);

        Ok(channel)
    }
}

#[async_trait]
impl Connector for Transport {
    async fn connect_to(&self, route: Route) -> Result<OutboundChannel> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed(route.to_string()));
        }

        // Held across the connect so racing first sends share one socket;
        // other routes never wait on it
        let slot = self.slot(route);
        let mut cached = slot.lock().await;

        // close_all may have drained the map before this slot was added
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed(route.to_string()));
        }

        if let Some(channel) = cached.as_ref() {
            if !channel.is_closed() {
                return Ok(channel.clone());
            }
            warn!(node = %self.local, %route, "Cached connection is dead, reconnecting");
            *cached = None;
            OPEN_CONNECTIONS.dec();
        }

        let channel = self.open(route).await?;
        *cached = Some(channel.clone());
        OPEN_CONNECTIONS.inc();

        Ok(channel)
    }
}

/// Drain one channel's queue onto its socket
async fn write_loop(route: Route, mut stream: TcpStream, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        let label = message.message_type.as_str();

        let line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!(%route, "Failed to serialize message: {}", e);
                MESSAGE_SEND_TOTAL.with_label_values(&[label, "error"]).inc();
                continue;
            }
        };

        if let Err(e) = stream.write_all(line.as_bytes()).await {
            error!(%route, "Failed to write message: {}", e);
            MESSAGE_SEND_TOTAL.with_label_values(&[label, "error"]).inc();
            break;
        }

        MESSAGE_SEND_TOTAL.with_label_values(&[label, "success"]).inc();
    }

    let _ = stream.shutdown().await;
    debug!(%route, "Writer stopped");
}
