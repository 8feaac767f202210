//! TCP transport.
//!
//! Outbound: every configured peer address is a candidate provider for every
//! URL and a candidate holder of every address. Each lookup dials a fresh
//! connection; the host closes it when the exchange is over.
//!
//! Inbound: each accepted connection gets one task reading frames.
//! `subscribe`/`unsubscribe` maintain the subscriber table, `verify address`
//! is answered on the spot, and `put`/`ack`/`private` are handed to the
//! host. Anything else ends the connection.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use canopy_core::config::NetworkConfig;
use canopy_core::crypto::Address;
use canopy_core::wire::{self, Msg, WireError};
use canopy_services::{InboundHandler, Peer, Transport};
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

/// Subscribers per URL, keyed by connection id.
type SubscriberTable = DashMap<String, DashMap<String, Arc<dyn Peer>>>;

// ── Peer ──────────────────────────────────────────────────────────────────────

/// One TCP connection, either dialled by us or accepted from a remote.
pub struct TcpPeer {
    id: String,
    /// Address to dial. `None` for accepted connections, which cannot be
    /// re-opened from this side.
    dial: Option<String>,
    connect_timeout: Duration,
    address: Mutex<Option<Address>>,
    reader: tokio::sync::Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
}

impl TcpPeer {
    /// A not-yet-connected peer at `addr`.
    pub fn outbound(addr: &str, connect_timeout: Duration) -> Self {
        Self {
            id: addr.to_string(),
            dial: Some(addr.to_string()),
            connect_timeout,
            address: Mutex::new(None),
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(None),
        }
    }

    /// Write side of an accepted connection. Reads belong to the
    /// connection task.
    fn inbound(remote: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id: remote.to_string(),
            dial: None,
            connect_timeout: Duration::ZERO,
            address: Mutex::new(None),
            reader: tokio::sync::Mutex::new(None),
            writer: tokio::sync::Mutex::new(Some(writer)),
        }
    }
}

fn not_connected(id: &str) -> WireError {
    WireError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        format!("{id} is not connected"),
    ))
}

#[async_trait]
impl Peer for TcpPeer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn address(&self) -> Option<Address> {
        self.address.lock().ok().and_then(|a| *a)
    }

    fn set_address(&self, address: Address) {
        if let Ok(mut slot) = self.address.lock() {
            *slot = Some(address);
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if writer.is_some() {
            return Ok(());
        }
        let Some(addr) = &self.dial else {
            bail!("inbound connection {} is closed", self.id);
        };

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .with_context(|| format!("connecting to {addr} timed out"))?
            .with_context(|| format!("connecting to {addr}"))?;
        let _ = stream.set_nodelay(true);
        let (r, w) = stream.into_split();
        *self.reader.lock().await = Some(r);
        *writer = Some(w);
        tracing::debug!(peer = %self.id, "connected");
        Ok(())
    }

    async fn close_conn(&self) -> Result<()> {
        if let Some(mut w) = self.writer.lock().await.take() {
            let _ = w.shutdown().await;
        }
        // A read in flight keeps its half until it returns.
        if let Ok(mut r) = self.reader.try_lock() {
            r.take();
        }
        Ok(())
    }

    async fn write_msg(&self, msg: &Msg) -> Result<(), WireError> {
        let mut guard = self.writer.lock().await;
        let w = guard.as_mut().ok_or_else(|| not_connected(&self.id))?;
        wire::write_msg(w, msg).await
    }

    async fn read_msg(&self) -> Result<Msg, WireError> {
        let mut guard = self.reader.lock().await;
        let r = guard.as_mut().ok_or_else(|| not_connected(&self.id))?;
        wire::read_msg(r).await
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

struct Shared {
    subscribers: SubscriberTable,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
    shutdown: broadcast::Sender<()>,
}

impl Shared {
    fn handler(&self) -> Option<Arc<dyn InboundHandler>> {
        self.handler.read().ok().and_then(|h| h.clone())
    }

    fn drop_subscriber(&self, conn_id: &str) {
        for urls in self.subscribers.iter() {
            urls.remove(conn_id);
        }
        self.subscribers.retain(|_, subs| !subs.is_empty());
    }
}

pub struct TcpTransport {
    listen_addr: String,
    connect_timeout: Duration,
    peers: Mutex<Vec<String>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shared: Arc<Shared>,
}

impl TcpTransport {
    pub fn new(config: &NetworkConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            listen_addr: config.listen_addr.clone(),
            connect_timeout: config.handshake_timeout(),
            peers: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
            shared: Arc::new(Shared {
                subscribers: DashMap::new(),
                handler: RwLock::new(None),
                shutdown,
            }),
        }
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|a| *a)
    }

    pub fn known_peers(&self) -> Vec<String> {
        self.peers.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Number of inbound connections subscribed to `url`.
    pub fn subscriber_count(&self, url: &str) -> usize {
        self.shared.subscribers.get(url).map(|s| s.len()).unwrap_or(0)
    }

    /// Stop accepting and end every inbound connection task.
    pub fn shutdown(&self) {
        let _ = self.shared.shutdown.send(());
    }

    fn fresh_peers(&self) -> Vec<Arc<dyn Peer>> {
        self.known_peers()
            .iter()
            .map(|addr| Arc::new(TcpPeer::outbound(addr, self.connect_timeout)) as Arc<dyn Peer>)
            .collect()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        if let Ok(mut slot) = self.shared.handler.write() {
            *slot = Some(handler);
        }
    }

    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.listen_addr))?;
        let local = listener.local_addr()?;
        if let Ok(mut slot) = self.local_addr.lock() {
            *slot = Some(local);
        }
        tracing::info!(addr = %local, "listening");

        tokio::spawn(accept_loop(listener, self.shared.clone()));
        Ok(())
    }

    async fn add_peer(&self, addr: &str) -> Result<()> {
        let addr = addr.trim();
        if addr.is_empty() {
            bail!("empty peer address");
        }
        let mut peers = self
            .peers
            .lock()
            .map_err(|_| anyhow::anyhow!("peer list poisoned"))?;
        if !peers.iter().any(|p| p == addr) {
            peers.push(addr.to_string());
            tracing::info!(peer = addr, "peer added");
        }
        Ok(())
    }

    async fn providers_of_url(&self, _url: &str) -> Result<Vec<Arc<dyn Peer>>> {
        Ok(self.fresh_peers())
    }

    async fn subscribers_to_url(&self, url: &str) -> Result<Vec<Arc<dyn Peer>>> {
        Ok(self
            .shared
            .subscribers
            .get(url)
            .map(|subs| subs.iter().map(|e| e.value().clone()).collect())
            .unwrap_or_default())
    }

    fn peers_with_address(&self, _address: &Address) -> mpsc::Receiver<Arc<dyn Peer>> {
        let candidates = self.fresh_peers();
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            for peer in candidates {
                if tx.send(peer).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("listener shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        let _ = stream.set_nodelay(true);
                        tokio::spawn(serve_conn(stream, remote, shared.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

async fn serve_conn(stream: TcpStream, remote: SocketAddr, shared: Arc<Shared>) {
    let (mut reader, writer) = stream.into_split();
    let peer = Arc::new(TcpPeer::inbound(remote, writer));
    let conn_id = peer.id();
    let peer: Arc<dyn Peer> = peer;
    let mut shutdown = shared.shutdown.subscribe();
    tracing::debug!(peer = %conn_id, "connection accepted");

    loop {
        let next = tokio::select! {
            _ = shutdown.recv() => break,
            msg = wire::read_msg(&mut reader) => msg,
        };
        let msg = match next {
            Ok(msg) => msg,
            Err(e) if e.is_eof() => break,
            Err(e) => {
                if e.is_protocol_violation() {
                    tracing::warn!(peer = %conn_id, error = %e, "protocol violation, closing");
                } else {
                    tracing::debug!(peer = %conn_id, error = %e, "read failed");
                }
                break;
            }
        };

        match msg {
            Msg::Subscribe(url) => {
                tracing::info!(peer = %conn_id, url = %url, "peer subscribed");
                shared
                    .subscribers
                    .entry(url)
                    .or_default()
                    .insert(conn_id.clone(), peer.clone());
            }
            Msg::Unsubscribe(url) => {
                tracing::info!(peer = %conn_id, url = %url, "peer unsubscribed");
                if let Some(subs) = shared.subscribers.get(&url) {
                    subs.remove(&conn_id);
                }
                shared.subscribers.remove_if(&url, |_, subs| subs.is_empty());
            }
            Msg::VerifyAddress(challenge) => {
                let reply = match shared.handler() {
                    Some(h) => match h.on_verify_address_received(&challenge) {
                        Ok(response) => Msg::VerifyAddressResponse(response),
                        Err(e) => Msg::Error(e.to_string()),
                    },
                    None => Msg::Error("not ready".into()),
                };
                if let Err(e) = peer.write_msg(&reply).await {
                    tracing::debug!(peer = %conn_id, error = %e, "verify address reply failed");
                    break;
                }
            }
            Msg::Put(tx) => match shared.handler() {
                Some(h) => h.on_tx_received(tx, peer.clone()).await,
                None => tracing::warn!(peer = %conn_id, "no handler, dropping put"),
            },
            Msg::Ack(hash) => {
                if let Some(h) = shared.handler() {
                    h.on_ack_received(hash, peer.clone()).await;
                }
            }
            Msg::Private(sealed) => match shared.handler() {
                Some(h) => h.on_private_received(sealed, peer.clone()).await,
                None => tracing::warn!(peer = %conn_id, "no handler, dropping private"),
            },
            Msg::Error(text) => {
                tracing::warn!(peer = %conn_id, error = %text, "peer reported error");
                break;
            }
            other @ Msg::VerifyAddressResponse(_) => {
                tracing::warn!(peer = %conn_id, msg_type = %other.msg_type(), "unexpected message, closing");
                break;
            }
        }
    }

    shared.drop_subscriber(&conn_id);
    if let Some(h) = shared.handler() {
        h.on_peer_closed(&conn_id);
    }
    let _ = peer.close_conn().await;
    tracing::debug!(peer = %conn_id, "connection closed");
}
