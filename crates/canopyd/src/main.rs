//! canopyd — Canopy peer-to-peer transaction host.

use anyhow::{Context, Result};

use canopy_core::config::CanopyConfig;
use canopyd::keys;
use canopyd::Node;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = CanopyConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = CanopyConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CanopyConfig::default()
    });

    // Keys
    let signing = keys::load_or_generate_signing(&config.identity.signing_key_path)
        .context("signing key")?;
    let encrypting = keys::load_or_generate_encrypting(&config.identity.encrypting_key_path)
        .context("encrypting key")?;
    tracing::info!(address = %signing.address(), "canopyd starting");

    let node = Node::start(&config, signing, encrypting).await?;
    tracing::info!(
        listen = ?node.local_addr(),
        peers = config.network.peers.len(),
        "node ready"
    );

    let subscribed = node.subscribe_all(&config.host.subscriptions).await;
    tracing::info!(
        subscribed,
        configured = config.host.subscriptions.len(),
        "subscriptions established"
    );

    // ── Wait for exit ────────────────────────────────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    node.shutdown();

    Ok(())
}
