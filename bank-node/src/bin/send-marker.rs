//! Operator tool: ask a node to start a snapshot
//!
//! Connects to a node's control (or any listening) port and sends the
//! sentinel MARKER.

use anyhow::Context;
use clap::Parser;
use message_bus::Message;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "send-marker")]
#[command(about = "Trigger a snapshot on a bank node", long_about = None)]
struct Cli {
    /// Node address, host:port
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    address: String,

    /// Connect timeout in seconds
    #[arg(long, default_value = "5")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    info!("Connecting to {}", cli.address);
    let mut stream = tokio::time::timeout(
        Duration::from_secs(cli.timeout),
        TcpStream::connect(&cli.address),
    )
    .await
    .context("connect timed out")?
    .with_context(|| format!("connecting to {}", cli.address))?;

    let line = Message::trigger().to_line()?;
    stream.write_all(line.as_bytes()).await?;
    stream.shutdown().await?;

    info!("Marker sent");
    Ok(())
}
