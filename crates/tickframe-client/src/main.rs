//! Tickframe demo client.
//!
//! Connects to a tickframe server, joins a room, keeps the connection alive
//! with a periodic `ping` and prints every message the server sends. Lines
//! typed on stdin are sent as `chat` messages.
//!
//! # Usage
//!
//! ```bash
//! tickframe-client --server 127.0.0.1:4433 --name alice --room lobby
//! ```

use std::{io::Write, time::Duration};

use clap::Parser;
use serde_json::json;
use tickframe_client::{ClientConfig, CodecKind, Envelope, ServerTrust, close_code, connect};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tickframe demo client
#[derive(Parser, Debug)]
#[command(name = "tickframe-client")]
#[command(about = "Tickframe demo chat client")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:4433")]
    server: String,

    /// Name to join with
    #[arg(short, long, default_value = "guest")]
    name: String,

    /// Room to join
    #[arg(short, long)]
    room: Option<String>,

    /// Wire codec (json, cbor)
    #[arg(long, default_value = "json")]
    codec: CodecKind,

    /// Seconds between keepalive pings
    #[arg(long, default_value = "30")]
    ping_interval: u64,

    /// PEM file with root certificates; skips verification when absent
    #[arg(long)]
    ca: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn print_envelope(envelope: &Envelope) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    if envelope.is_empty() {
        writeln!(out, "[{}]", envelope.kind())
    } else {
        writeln!(out, "[{}] {}", envelope.kind(), String::from_utf8_lossy(envelope.payload()))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let trust = match &args.ca {
        Some(path) => ServerTrust::PemRoots(std::fs::read(path)?),
        None => {
            tracing::warn!("No CA provided - server certificate is NOT verified");
            ServerTrust::InsecureSkipVerify
        },
    };

    let config = ClientConfig {
        trust,
        codec: args.codec,
        keep_alive_interval: Some(Duration::from_secs(10)),
        ..ClientConfig::development(args.server.clone())
    };

    let mut client = connect(&config).await?;
    tracing::info!("Connected to {}", args.server);

    client.send(&Envelope::json("join", &json!({ "name": args.name, "room": args.room }))?).await?;

    let mut ping = tokio::time::interval(Duration::from_secs(args.ping_interval.max(1)));
    ping.tick().await;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = ping.tick() => {
                client.send(&Envelope::empty("ping")).await?;
            },
            line = stdin.next_line() => match line? {
                Some(text) if !text.trim().is_empty() => {
                    client.send(&Envelope::json("chat", &json!({ "text": text }))?).await?;
                },
                Some(_) => {},
                None => break,
            },
            received = client.recv() => match received {
                Some(envelope) => print_envelope(&envelope)?,
                None => {
                    tracing::warn!("Server closed the connection: {}", client.closed().await);
                    return Ok(());
                },
            },
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            },
        }
    }

    client.close(close_code::NORMAL, "bye").await;

    Ok(())
}
