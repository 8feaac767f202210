//! Host orchestrator.
//!
//! Local submissions go through sign → persist → dispatch. Dispatch is a
//! fan-out to the URL's subscribers for public transactions and a sealed
//! per-recipient delivery for private ones. Inbound traffic from the
//! transport lands in the `InboundHandler` impl below.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use canopy_core::config::HostConfig;
use canopy_core::crypto::{Address, EncryptingKeypair, EncryptingPublicKey, Hash, SigningKeypair};
use canopy_core::tx::Tx;
use canopy_core::wire::{Msg, VerifyAddressResponse, WireError};

use crate::error::HostError;
use crate::seen::SeenSet;
use crate::store::Store;
use crate::subscription::SubscriptionManager;
use crate::transport::{InboundHandler, Peer, Transport};
use crate::verify::{self, AddressVerifier};

pub struct Host {
    me: Weak<Host>,
    signing: SigningKeypair,
    encrypting: EncryptingKeypair,
    transport: Arc<dyn Transport>,
    store: Arc<dyn Store>,
    seen: SeenSet,
    subscriptions: SubscriptionManager,
    verifier: AddressVerifier,
}

impl Host {
    pub fn new(
        signing: SigningKeypair,
        encrypting: EncryptingKeypair,
        transport: Arc<dyn Transport>,
        store: Arc<dyn Store>,
        config: &HostConfig,
        handshake_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            signing,
            encrypting,
            subscriptions: SubscriptionManager::new(transport.clone()),
            transport,
            store,
            seen: SeenSet::new(config.seen_capacity_per_peer),
            verifier: AddressVerifier::new(handshake_timeout),
        })
    }

    /// Start the store, register for inbound traffic, then start the
    /// transport.
    pub async fn start(&self) -> Result<(), HostError> {
        self.store.start().map_err(HostError::Store)?;
        if let Some(me) = self.me.upgrade() {
            self.transport.set_handler(me);
        }
        self.transport.start().await.map_err(HostError::Transport)?;
        tracing::info!(address = %self.address(), "host started");
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.signing.address()
    }

    pub fn encrypting_public_key(&self) -> EncryptingPublicKey {
        self.encrypting.public_key()
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub async fn add_peer(&self, addr: &str) -> Result<(), HostError> {
        self.transport.add_peer(addr).await.map_err(HostError::Transport)
    }

    pub async fn subscribe(&self, url: &str) -> Result<(), HostError> {
        let sink: Weak<dyn InboundHandler> = self.me.clone();
        self.subscriptions.subscribe(url, sink).await
    }

    pub fn unsubscribe(&self, url: &str) -> Result<(), HostError> {
        self.subscriptions.unsubscribe(url)
    }

    pub fn is_subscribed(&self, url: &str) -> bool {
        self.subscriptions.is_subscribed(url)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.urls()
    }

    /// Cancel all subscriptions.
    pub fn shutdown(&self) {
        self.subscriptions.shutdown();
    }

    /// Submit a local transaction.
    ///
    /// An unsigned tx is signed in place with the local key. Once stored the
    /// tx stays stored even if dispatch reports a failure.
    pub async fn add_tx(&self, tx: &mut Tx) -> Result<Hash, HostError> {
        if !tx.is_signed() {
            self.sign_tx(tx)?;
        }
        let hash = tx.hash();
        self.store.add_tx(tx).map_err(HostError::Store)?;
        tracing::debug!(tx = %hash.pretty(), url = %tx.url, private = tx.is_private(), "tx stored");
        self.put(tx).await?;
        Ok(hash)
    }

    /// Sign `tx` with the local key and claim it as ours.
    pub fn sign_tx(&self, tx: &mut Tx) -> Result<(), HostError> {
        tx.sig = self
            .signing
            .sign_hash(&tx.hash())
            .map_err(|_| HostError::UnsignedTx)?;
        tx.from = self.address();
        Ok(())
    }

    /// Dispatch a signed transaction: sealed per recipient if it has any,
    /// otherwise broadcast to the URL's subscribers.
    pub async fn put(&self, tx: &Tx) -> Result<(), HostError> {
        if !tx.is_signed() {
            return Err(HostError::UnsignedTx);
        }
        if tx.is_private() {
            self.put_private(tx).await
        } else {
            self.broadcast(tx).await
        }
    }

    async fn broadcast(&self, tx: &Tx) -> Result<(), HostError> {
        let hash = tx.hash();
        let subscribers = self
            .transport
            .subscribers_to_url(&tx.url)
            .await
            .map_err(HostError::Transport)?;

        let mut attempted = 0;
        let mut failed = 0;
        for peer in subscribers {
            let peer_id = peer.id();
            if self.seen.has_seen(&peer_id, &hash) {
                tracing::trace!(tx = %hash.pretty(), peer = %peer_id, "already seen, skipping");
                continue;
            }
            attempted += 1;
            match send_put(peer.as_ref(), tx).await {
                Ok(()) => {
                    self.seen.mark_seen(&peer_id, hash);
                    tracing::debug!(tx = %hash.pretty(), peer = %peer_id, url = %tx.url, "put sent");
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(tx = %hash.pretty(), peer = %peer_id, error = %e, "put failed");
                }
            }
        }

        if failed > 0 {
            return Err(HostError::PartialDelivery { failed, attempted });
        }
        Ok(())
    }

    async fn put_private(&self, tx: &Tx) -> Result<(), HostError> {
        let hash = tx.hash();
        let payload = tx.to_bytes().map_err(WireError::from)?;
        let me = self.address();

        let mut attempted = 0;
        let mut failed = 0;
        for recipient in &tx.recipients {
            if *recipient == me {
                continue;
            }
            let Some((peer, key)) = self.peer_with_address(recipient).await else {
                tracing::warn!(tx = %hash.pretty(), recipient = %recipient, "no verified peer for recipient, skipping");
                continue;
            };

            attempted += 1;
            let sent = match self.encrypting.seal_message_for(&key, &payload) {
                Ok(sealed) => peer.write_msg(&Msg::Private(sealed)).await.map_err(HostError::from),
                Err(e) => Err(e.into()),
            };
            match sent {
                Ok(()) => {
                    tracing::debug!(tx = %hash.pretty(), recipient = %recipient, peer = %peer.id(), "private tx sent");
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(tx = %hash.pretty(), recipient = %recipient, error = %e, "private delivery failed");
                }
            }
            let _ = peer.close_conn().await;
        }

        if failed > 0 {
            return Err(HostError::PartialDelivery { failed, attempted });
        }
        Ok(())
    }

    /// First candidate that connects and proves it holds `address`.
    ///
    /// `None` means nobody verified; it is not an error. Remaining
    /// candidates are not enumerated once one verifies.
    pub async fn peer_with_address(
        &self,
        address: &Address,
    ) -> Option<(Arc<dyn Peer>, EncryptingPublicKey)> {
        let mut candidates = self.transport.peers_with_address(address);
        while let Some(peer) = candidates.recv().await {
            if let Err(e) = peer.ensure_connected().await {
                tracing::debug!(peer = %peer.id(), address = %address, error = %e, "candidate unreachable");
                continue;
            }
            match self.verifier.verify(peer.as_ref(), address).await {
                Ok(key) => return Some((peer, key)),
                Err(e) => {
                    tracing::debug!(peer = %peer.id(), address = %address, error = %e, "candidate failed verification");
                    let _ = peer.close_conn().await;
                }
            }
        }
        None
    }

    /// Persist `tx` if it is new. Returns whether it was new.
    fn store_if_new(&self, tx: &Tx, hash: &Hash) -> Result<bool, HostError> {
        if self.store.have_tx(hash).map_err(HostError::Store)? {
            return Ok(false);
        }
        self.store.add_tx(tx).map_err(HostError::Store)?;
        Ok(true)
    }

    async fn send_ack(&self, hash: Hash, to: &dyn Peer) {
        if let Err(e) = to.write_msg(&Msg::Ack(hash)).await {
            tracing::warn!(tx = %hash.pretty(), peer = %to.id(), error = %e, "ack failed");
        }
    }
}

/// The signature must recover to the address the tx claims as `from`.
fn check_author(tx: &Tx) -> Result<(), HostError> {
    if !tx.is_signed() {
        return Err(HostError::UnsignedTx);
    }
    let recovered = tx.signer()?;
    if recovered != tx.from {
        return Err(HostError::InvalidSignature { expected: tx.from, recovered });
    }
    Ok(())
}

async fn send_put(peer: &dyn Peer, tx: &Tx) -> Result<(), HostError> {
    peer.ensure_connected().await.map_err(HostError::Transport)?;
    peer.write_msg(&Msg::Put(tx.clone())).await?;
    Ok(())
}

#[async_trait]
impl InboundHandler for Host {
    async fn on_tx_received(&self, tx: Tx, from: Arc<dyn Peer>) {
        let hash = tx.hash();
        let peer_id = from.id();
        self.seen.mark_seen(&peer_id, hash);

        if tx.is_private() {
            tracing::warn!(tx = %hash.pretty(), peer = %peer_id, "private tx arrived as put, dropping");
            return;
        }
        if let Err(e) = check_author(&tx) {
            tracing::warn!(tx = %hash.pretty(), peer = %peer_id, error = %e, "unsigned or badly signed tx, dropping");
            return;
        }

        match self.store_if_new(&tx, &hash) {
            Ok(true) => {
                tracing::info!(tx = %hash.pretty(), peer = %peer_id, url = %tx.url, "new tx");
                // Already stored; a failed relay must not fail the receipt.
                if let Err(e) = self.broadcast(&tx).await {
                    tracing::warn!(tx = %hash.pretty(), error = %e, "relay incomplete");
                }
            }
            Ok(false) => {
                tracing::debug!(tx = %hash.pretty(), peer = %peer_id, "duplicate tx");
            }
            Err(e) => {
                tracing::warn!(tx = %hash.pretty(), peer = %peer_id, error = %e, "failed to store tx, not relaying");
            }
        }

        self.send_ack(hash, from.as_ref()).await;
    }

    async fn on_ack_received(&self, hash: Hash, from: Arc<dyn Peer>) {
        let peer_id = from.id();
        tracing::trace!(tx = %hash.pretty(), peer = %peer_id, "ack");
        self.seen.mark_seen(&peer_id, hash);
    }

    async fn on_private_received(&self, sealed: Vec<u8>, from: Arc<dyn Peer>) {
        let peer_id = from.id();
        let plaintext = match self.encrypting.open_message(&sealed) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(peer = %peer_id, error = %e, "cannot open private message");
                return;
            }
        };
        let tx = match Tx::from_bytes(&plaintext) {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!(peer = %peer_id, error = %e, "private message is not a tx");
                return;
            }
        };

        let hash = tx.hash();
        if let Err(e) = check_author(&tx) {
            tracing::warn!(tx = %hash.pretty(), peer = %peer_id, error = %e, "unsigned or badly signed private tx, dropping");
            return;
        }
        if !tx.recipients.contains(&self.address()) {
            tracing::warn!(tx = %hash.pretty(), peer = %peer_id, "private tx not addressed to us, dropping");
            return;
        }

        self.seen.mark_seen(&peer_id, hash);
        match self.store_if_new(&tx, &hash) {
            Ok(true) => tracing::info!(tx = %hash.pretty(), peer = %peer_id, "new private tx"),
            Ok(false) => tracing::debug!(tx = %hash.pretty(), peer = %peer_id, "duplicate private tx"),
            Err(e) => tracing::warn!(tx = %hash.pretty(), peer = %peer_id, error = %e, "failed to store private tx"),
        }
        self.send_ack(hash, from.as_ref()).await;
    }

    fn on_verify_address_received(&self, challenge: &[u8]) -> Result<VerifyAddressResponse, HostError> {
        verify::respond(&self.signing, &self.encrypting.public_key(), challenge)
    }

    fn on_peer_closed(&self, peer_id: &str) {
        self.seen.forget_peer(peer_id);
        tracing::trace!(peer = %peer_id, "seen record dropped");
    }
}
