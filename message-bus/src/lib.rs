//! Message Bus over point-to-point TCP channels
//!
//! Provides the channel layer every bank node talks through:
//! - Line-delimited JSON wire envelope (`from`, `type`, `numData`, `strData`)
//! - One cached outbound connection per route, created on first use
//! - One listener per inbound port, feeding a [`MessageHandler`]
//! - Port convention separating transfer traffic from snapshot reports
//! - Observability via Prometheus metrics

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod listener;
pub mod message;
pub mod metrics;
pub mod routing;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use listener::{Inbound, Listener, MessageHandler};
pub use message::Message;
pub use routing::{ChannelKind, PortLayout, Route};
pub use transport::{Connector, OutboundChannel, Peer, Transport};
pub use types::MessageType;
