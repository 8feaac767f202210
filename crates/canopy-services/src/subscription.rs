//! Outbound subscriptions.
//!
//! One entry per URL. Each entry owns exactly one provider connection and one
//! read loop task that feeds incoming `put`s to the host. The loop ends on
//! unsubscribe, on a read error, or on any message other than `put`; in
//! every case the connection is closed once and the entry is removed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use canopy_core::wire::Msg;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::HostError;
use crate::transport::{InboundHandler, Peer, Transport};

struct OutboundSubscription {
    /// Distinguishes this entry from a later subscription to the same URL.
    generation: u64,
    peer: Arc<dyn Peer>,
    done: oneshot::Sender<()>,
}

type Table = Arc<DashMap<String, OutboundSubscription>>;

pub struct SubscriptionManager {
    transport: Arc<dyn Transport>,
    subs: Table,
    next_generation: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            subs: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Subscribe to `url` through the first provider that connects.
    ///
    /// Incoming transactions go to `sink`. The loop exits once the sink is
    /// gone.
    pub async fn subscribe(
        &self,
        url: &str,
        sink: Weak<dyn InboundHandler>,
    ) -> Result<(), HostError> {
        if self.subs.contains_key(url) {
            return Err(HostError::AlreadySubscribed(url.to_string()));
        }

        let providers = self
            .transport
            .providers_of_url(url)
            .await
            .map_err(HostError::Transport)?;

        let mut chosen = None;
        for peer in providers {
            match peer.ensure_connected().await {
                Ok(()) => {
                    chosen = Some(peer);
                    break;
                }
                Err(e) => {
                    tracing::warn!(url, peer = %peer.id(), error = %e, "provider unreachable");
                }
            }
        }
        let peer = chosen.ok_or_else(|| HostError::NoPeersForUrl(url.to_string()))?;

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (done_tx, done_rx) = oneshot::channel();

        // A concurrent subscribe may have won while we were connecting.
        let reserved = match self.subs.entry(url.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(OutboundSubscription {
                    generation,
                    peer: peer.clone(),
                    done: done_tx,
                });
                true
            }
        };
        if !reserved {
            let _ = peer.close_conn().await;
            return Err(HostError::AlreadySubscribed(url.to_string()));
        }

        if let Err(e) = peer.write_msg(&Msg::Subscribe(url.to_string())).await {
            self.subs.remove_if(url, |_, s| s.generation == generation);
            let _ = peer.close_conn().await;
            return Err(e.into());
        }

        tracing::info!(url, peer = %peer.id(), "subscribed");
        tokio::spawn(read_loop(
            url.to_string(),
            generation,
            peer,
            done_rx,
            self.subs.clone(),
            sink,
        ));
        Ok(())
    }

    /// Cancel the subscription to `url`. The read loop sends a best-effort
    /// `unsubscribe`, closes the connection, and exits.
    pub fn unsubscribe(&self, url: &str) -> Result<(), HostError> {
        let (_, sub) = self
            .subs
            .remove(url)
            .ok_or_else(|| HostError::NotSubscribed(url.to_string()))?;
        tracing::info!(url, peer = %sub.peer.id(), "unsubscribing");
        // The loop may already be on its way out.
        let _ = sub.done.send(());
        Ok(())
    }

    pub fn is_subscribed(&self, url: &str) -> bool {
        self.subs.contains_key(url)
    }

    pub fn urls(&self) -> Vec<String> {
        self.subs.iter().map(|e| e.key().clone()).collect()
    }

    /// Cancel every subscription.
    pub fn shutdown(&self) {
        for url in self.urls() {
            let _ = self.unsubscribe(&url);
        }
    }
}

async fn read_loop(
    url: String,
    generation: u64,
    peer: Arc<dyn Peer>,
    mut done: oneshot::Receiver<()>,
    subs: Table,
    sink: Weak<dyn InboundHandler>,
) {
    let peer_id = peer.id();
    let cancelled = loop {
        let next = tokio::select! {
            biased;
            _ = &mut done => break true,
            msg = peer.read_msg() => msg,
        };

        match next {
            Ok(Msg::Put(mut tx)) => {
                tx.url = url.clone();
                let Some(sink) = sink.upgrade() else {
                    break false;
                };
                tracing::trace!(url = %url, peer = %peer_id, tx = %tx.hash().pretty(), "put on subscription");
                sink.on_tx_received(tx, peer.clone()).await;
            }
            Ok(other) => {
                tracing::warn!(
                    url = %url,
                    peer = %peer_id,
                    msg_type = %other.msg_type(),
                    "unexpected message on subscription, dropping it"
                );
                break false;
            }
            Err(e) if e.is_eof() => {
                tracing::info!(url = %url, peer = %peer_id, "provider closed subscription");
                break false;
            }
            Err(e) => {
                tracing::warn!(url = %url, peer = %peer_id, error = %e, "subscription read failed");
                break false;
            }
        }
    };

    if cancelled {
        if let Err(e) = peer.write_msg(&Msg::Unsubscribe(url.clone())).await {
            tracing::debug!(url = %url, peer = %peer_id, error = %e, "unsubscribe not delivered");
        }
    }
    if let Err(e) = peer.close_conn().await {
        tracing::debug!(url = %url, peer = %peer_id, error = %e, "close failed");
    }
    subs.remove_if(&url, |_, s| s.generation == generation);
    tracing::debug!(url = %url, peer = %peer_id, cancelled, "subscription ended");
}
