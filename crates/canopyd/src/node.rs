//! Wiring: one host on a TCP transport with an in-memory store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use canopy_core::config::CanopyConfig;
use canopy_core::crypto::{EncryptingKeypair, SigningKeypair};
use canopy_services::{Host, MemoryStore};

use crate::transport::TcpTransport;

pub struct Node {
    pub host: Arc<Host>,
    pub store: MemoryStore,
    pub transport: Arc<TcpTransport>,
}

impl Node {
    /// Start listening and register the configured peers. Subscriptions are
    /// left to the caller, since providers may not be up yet.
    pub async fn start(
        config: &CanopyConfig,
        signing: SigningKeypair,
        encrypting: EncryptingKeypair,
    ) -> Result<Node> {
        let store = MemoryStore::new();
        let transport = Arc::new(TcpTransport::new(&config.network));
        let host = Host::new(
            signing,
            encrypting,
            transport.clone(),
            Arc::new(store.clone()),
            &config.host,
            config.network.handshake_timeout(),
        );
        host.start().await.context("failed to start host")?;

        for peer in &config.network.peers {
            host.add_peer(peer)
                .await
                .with_context(|| format!("failed to add peer {peer}"))?;
        }

        Ok(Node { host, store, transport })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    /// Subscribe to each URL, logging the ones that fail.
    pub async fn subscribe_all(&self, urls: &[String]) -> usize {
        let mut ok = 0;
        for url in urls {
            match self.host.subscribe(url).await {
                Ok(()) => ok += 1,
                Err(e) => tracing::warn!(url = %url, error = %e, "subscribe failed"),
            }
        }
        ok
    }

    pub fn shutdown(&self) {
        self.host.shutdown();
        self.transport.shutdown();
    }
}
