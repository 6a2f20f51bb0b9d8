//! Inbound side: port listeners feeding a message handler

use crate::{
    message::Message,
    metrics::MESSAGE_RECEIVE_TOTAL,
    Error, Result,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Inbound queue depth per port
const INBOUND_QUEUE: usize = 1024;

/// Message handler trait
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message received on `port`
    async fn handle(&self, port: u16, message: Message) -> Result<()>;
}

/// Messages arriving on one bound port
///
/// Every accepted connection is decoded line by line into a single queue,
/// so messages from one sender keep their order.
#[derive(Debug)]
pub struct Inbound {
    port: u16,
    rx: mpsc::Receiver<Result<Message>>,
    acceptor: JoinHandle<()>,
}

impl Inbound {
    /// Start accepting on an already bound listener
    pub fn spawn(listener: TcpListener) -> Result<Self> {
        let port = listener.local_addr()?.port();
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let acceptor = tokio::spawn(accept_loop(listener, port, tx));

        Ok(Self { port, rx, acceptor })
    }

    /// Port this inbound is bound to
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the next message
    ///
    /// Decode failures are yielded as `Err` so the caller can log and drop
    /// them; `None` means the acceptor is gone.
    pub async fn next(&mut self) -> Option<Result<Message>> {
        self.rx.recv().await
    }
}

impl Drop for Inbound {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

async fn accept_loop(listener: TcpListener, port: u16, tx: mpsc::Sender<Result<Message>>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote_addr)) => {
                debug!(port, %remote_addr, "Incoming connection");
                tokio::spawn(read_loop(stream, remote_addr, port, tx.clone()));
            }
            Err(e) => {
                error!(port, "Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn read_loop(
    stream: TcpStream,
    remote_addr: SocketAddr,
    port: u16,
    tx: mpsc::Sender<Result<Message>>,
) {
    let mut lines = BufReader::new(stream).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(port, %remote_addr, "Connection read failed: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if tx.send(Message::from_bytes(line.as_bytes())).await.is_err() {
            // inbound dropped, listener stopped
            break;
        }
    }

    debug!(port, %remote_addr, "Connection closed");
}

/// Runs one port's inbound queue against a handler until shutdown
#[derive(Debug)]
pub struct Listener {
    inbound: Inbound,
    shutdown: watch::Receiver<bool>,
}

impl Listener {
    /// Create new listener
    pub fn new(inbound: Inbound, shutdown: watch::Receiver<bool>) -> Self {
        Self { inbound, shutdown }
    }

    /// Process messages until shutdown is signalled
    ///
    /// Malformed messages and handler failures are logged and dropped; they
    /// never end the loop.
    pub async fn run<H>(mut self, handler: Arc<H>) -> Result<()>
    where
        H: MessageHandler + ?Sized + 'static,
    {
        let port = self.inbound.port();
        info!(port, "Listener running");

        while !*self.shutdown.borrow() {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                next = self.inbound.next() => {
                    match next {
                        Some(Ok(message)) => Self::dispatch(handler.as_ref(), port, message).await,
                        Some(Err(e)) => {
                            error!(port, "Dropping malformed message: {}", e);
                            MESSAGE_RECEIVE_TOTAL
                                .with_label_values(&["unknown", "decode_error"])
                                .inc();
                        }
                        None => {
                            return Err(Error::Connection(format!("acceptor on port {} stopped", port)));
                        }
                    }
                }
            }
        }

        info!(port, "Listener stopped");
        Ok(())
    }

    async fn dispatch<H>(handler: &H, port: u16, message: Message)
    where
        H: MessageHandler + ?Sized,
    {
        let label = message.message_type.as_str();
        let from = message.from;

        match handler.handle(port, message).await {
            Ok(()) => {
                MESSAGE_RECEIVE_TOTAL.with_label_values(&[label, "success"]).inc();
            }
            Err(e) => {
                warn!(port, %from, message_type = label, "Message dropped: {}", e);
                MESSAGE_RECEIVE_TOTAL
                    .with_label_values(&[label, "handler_error"])
                    .inc();
            }
        }
    }
}
