//! Canopy integration test harness.
//!
//! Every test starts its own nodes on loopback with OS-assigned ports, so
//! tests run in parallel without sharing state. A node here is the same
//! `canopyd::Node` the daemon runs, minus key files and config loading.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use canopy_core::config::{CanopyConfig, NetworkConfig};
use canopy_core::crypto::{EncryptingKeypair, SigningKeypair};
use canopy_core::tx::Tx;
use canopyd::Node;

mod private;
mod public;
mod subscriptions;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const ROOM: &str = "chat/room1";

/// How long any single condition may take to become true.
pub const SETTLE: Duration = Duration::from_secs(5);

/// Start a node listening on an ephemeral loopback port that dials `peers`.
pub async fn spawn_node(peers: &[&Node]) -> Result<Node> {
    let mut addrs = Vec::new();
    for peer in peers {
        addrs.push(peer.local_addr().context("peer is not listening")?.to_string());
    }
    spawn_node_with(addrs).await
}

pub async fn spawn_node_with(peers: Vec<String>) -> Result<Node> {
    let config = CanopyConfig {
        network: NetworkConfig {
            listen_addr: "127.0.0.1:0".into(),
            peers,
            handshake_timeout_secs: 2,
        },
        ..CanopyConfig::default()
    };
    Node::start(&config, SigningKeypair::generate(), EncryptingKeypair::generate()).await
}

/// A loopback address nothing listens on.
pub async fn dead_addr() -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?)
}

/// Poll `cond` until it holds or `SETTLE` elapses.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + SETTLE;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    bail!("timed out waiting for {what}")
}

/// Wait until `provider` has registered `n` subscribers to `url`.
pub async fn wait_for_subscribers(provider: &Node, url: &str, n: usize) -> Result<()> {
    wait_until(&format!("{n} subscribers to {url}"), || {
        provider.transport.subscriber_count(url) == n
    })
    .await
}

/// Wait until `node` holds the tx with `hash`, and return it.
pub async fn wait_for_tx(node: &Node, hash: &canopy_core::crypto::Hash) -> Result<Tx> {
    wait_until("tx to arrive", || node.store.get_tx(hash).is_some()).await?;
    node.store.get_tx(hash).context("tx vanished")
}

pub fn text_tx(url: &str, text: &str) -> Tx {
    Tx::new(url, vec![text.to_string()])
}
