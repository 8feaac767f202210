//! In-memory peers and transport for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use canopy_core::crypto::Address;
use canopy_core::wire::{self, Msg, WireError};
use dashmap::DashMap;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

use crate::transport::{InboundHandler, Peer, Transport};

const PIPE_CAPACITY: usize = 1 << 20;

/// One end of an in-memory connection.
pub struct MemPeer {
    id: String,
    address: Mutex<Option<Address>>,
    reader: tokio::sync::Mutex<Option<ReadHalf<DuplexStream>>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<DuplexStream>>>,
    connect_fails: AtomicBool,
    closes: AtomicUsize,
}

impl MemPeer {
    /// Two connected peers. `a` is named `a_id` and talks to `b`.
    pub fn pair(a_id: &str, b_id: &str) -> (MemPeer, MemPeer) {
        let (a, b) = tokio::io::duplex(PIPE_CAPACITY);
        (Self::from_stream(a_id, a), Self::from_stream(b_id, b))
    }

    fn from_stream(id: &str, stream: DuplexStream) -> Self {
        let (r, w) = tokio::io::split(stream);
        Self {
            id: id.to_string(),
            address: Mutex::new(None),
            reader: tokio::sync::Mutex::new(Some(r)),
            writer: tokio::sync::Mutex::new(Some(w)),
            connect_fails: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        }
    }

    /// A peer whose `ensure_connected` always fails.
    pub fn unreachable(id: &str) -> MemPeer {
        let (peer, _) = Self::pair(id, "nowhere");
        peer.connect_fails.store(true, Ordering::SeqCst);
        peer
    }

    /// Times `close_conn` was called.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

fn not_connected() -> WireError {
    WireError::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "closed"))
}

#[async_trait]
impl Peer for MemPeer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn address(&self) -> Option<Address> {
        *self.address.lock().unwrap()
    }

    fn set_address(&self, address: Address) {
        *self.address.lock().unwrap() = Some(address);
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.connect_fails.load(Ordering::SeqCst) {
            bail!("{} is unreachable", self.id);
        }
        Ok(())
    }

    async fn close_conn(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if let Some(mut w) = self.writer.lock().await.take() {
            let _ = w.shutdown().await;
        }
        if let Ok(mut r) = self.reader.try_lock() {
            r.take();
        }
        Ok(())
    }

    async fn write_msg(&self, msg: &Msg) -> Result<(), WireError> {
        let mut guard = self.writer.lock().await;
        let w = guard.as_mut().ok_or_else(not_connected)?;
        wire::write_msg(w, msg).await
    }

    async fn read_msg(&self) -> Result<Msg, WireError> {
        let mut guard = self.reader.lock().await;
        let r = guard.as_mut().ok_or_else(not_connected)?;
        wire::read_msg(r).await
    }
}

/// Transport with a fixed routing table.
#[derive(Default)]
pub struct FakeTransport {
    pub providers: Mutex<Vec<Arc<dyn Peer>>>,
    pub subscribers: DashMap<String, Vec<Arc<dyn Peer>>>,
    /// Candidates returned for every address lookup.
    pub candidates: Mutex<Vec<Arc<dyn Peer>>>,
    pub handler: Mutex<Option<Arc<dyn InboundHandler>>>,
    pub added: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&self, peer: Arc<dyn Peer>) {
        self.providers.lock().unwrap().push(peer);
    }

    pub fn add_subscriber(&self, url: &str, peer: Arc<dyn Peer>) {
        self.subscribers.entry(url.to_string()).or_default().push(peer);
    }

    pub fn add_candidate(&self, peer: Arc<dyn Peer>) {
        self.candidates.lock().unwrap().push(peer);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn add_peer(&self, addr: &str) -> Result<()> {
        self.added.lock().unwrap().push(addr.to_string());
        Ok(())
    }

    async fn providers_of_url(&self, _url: &str) -> Result<Vec<Arc<dyn Peer>>> {
        Ok(self.providers.lock().unwrap().clone())
    }

    async fn subscribers_to_url(&self, url: &str) -> Result<Vec<Arc<dyn Peer>>> {
        Ok(self.subscribers.get(url).map(|s| s.clone()).unwrap_or_default())
    }

    fn peers_with_address(&self, _address: &Address) -> mpsc::Receiver<Arc<dyn Peer>> {
        let candidates = self.candidates.lock().unwrap().clone();
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
