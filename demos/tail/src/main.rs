//! LDT tail
//!
//! Connects to an LDT server, prints every message and lifecycle event, and
//! sends each stdin line as a pre-formatted frame (`{route} / {data}`).
//!
//! Environment variables:
//! - LDT_URL, or LDT_HOST and LDT_PORT: server endpoint
//! - LDT_COOLDOWN_SECS: reconnect cooldown (default 10)
//! - LDT_CONNECT_TIMEOUT_SECS: connect timeout (default 10)
//! - LDT_TLS: on|off (default on)
//! - LDT_TLS_SERVER_NAME, LDT_TLS_CA_FILE: TLS verification overrides
//! - RUST_LOG: tracing filter (default info)

use anyhow::Context;
use ldt_client::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let config = ClientConfig::from_env().context("reading LDT_* configuration")?;
    let client = LdtClientBuilder::from_config(config).spawn()?;
    let mut events = client.events().await?;

    if let Err(err) = client.connect().await {
        // The cooldown retry is armed; keep going unless nothing can ever connect.
        match err {
            ClientError::NoEndpoint => anyhow::bail!("set LDT_URL or LDT_HOST/LDT_PORT"),
            err => warn!(error = %err, "initial connect failed"),
        }
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Connected { .. }) => info!("connected"),
                Some(ClientEvent::Disconnected { error: Some(err), .. }) => {
                    warn!(error = %err, "disconnected, retrying after cooldown");
                }
                Some(ClientEvent::Disconnected { error: None, .. }) => {
                    info!("server closed the connection");
                    break;
                }
                Some(ClientEvent::Message { message, .. }) => {
                    let kind = if message.is_push() { "push" } else { "reply" };
                    println!("[{kind} {}] {}", message.status_or_route(), message.body());
                }
                None => break,
            },
            line = stdin.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(err) = client.send(line).await {
                        warn!(error = %err, "not sent");
                    }
                }
                None => break,
            },
        }
    }

    client.shutdown().await?;
    Ok(())
}
