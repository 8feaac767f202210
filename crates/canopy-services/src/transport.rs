//! Capabilities the host consumes from the network layer.
//!
//! The host never opens sockets itself. A `Transport` hands out `Peer`s
//! and calls back into an `InboundHandler` for every message that arrives
//! on a connection the host did not open.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use canopy_core::crypto::{Address, Hash};
use canopy_core::tx::Tx;
use canopy_core::wire::{Msg, VerifyAddressResponse, WireError};
use tokio::sync::mpsc;

use crate::error::HostError;

/// A remote endpoint.
///
/// Methods take `&self`; implementations guard their connection state
/// internally so a peer can be shared between the fan-out paths and a
/// subscription read loop.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Stable opaque identifier, used as the seen-set key.
    fn id(&self) -> String;

    /// Address proven by the last successful verification, if any.
    fn address(&self) -> Option<Address>;

    fn set_address(&self, address: Address);

    /// Open the connection if it is not already open.
    async fn ensure_connected(&self) -> Result<()>;

    /// Close the connection. Closing an already closed peer is a no-op.
    async fn close_conn(&self) -> Result<()>;

    async fn write_msg(&self, msg: &Msg) -> Result<(), WireError>;

    /// Read the next framed message.
    ///
    /// Must be cancel safe with respect to dropping the future: the caller
    /// only drops an in-flight read when it is about to close the peer.
    async fn read_msg(&self) -> Result<Msg, WireError>;
}

/// Network layer consumed by the host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register the receiver for inbound put/ack/private/verify traffic.
    fn set_handler(&self, handler: Arc<dyn InboundHandler>);

    async fn start(&self) -> Result<()>;

    async fn add_peer(&self, addr: &str) -> Result<()>;

    /// Candidate providers of `url`, in preference order.
    async fn providers_of_url(&self, url: &str) -> Result<Vec<Arc<dyn Peer>>>;

    /// Peers currently subscribed to `url` on this node.
    async fn subscribers_to_url(&self, url: &str) -> Result<Vec<Arc<dyn Peer>>>;

    /// Stream of peers that may hold `address`. Candidates are unverified.
    /// Dropping the receiver stops the enumeration.
    fn peers_with_address(&self, address: &Address) -> mpsc::Receiver<Arc<dyn Peer>>;
}

/// Callbacks invoked by the transport. May run concurrently for
/// different peers.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_tx_received(&self, tx: Tx, from: Arc<dyn Peer>);

    async fn on_ack_received(&self, hash: Hash, from: Arc<dyn Peer>);

    async fn on_private_received(&self, sealed: Vec<u8>, from: Arc<dyn Peer>);

    /// Answer an address challenge. Synchronous and side-effect free.
    fn on_verify_address_received(&self, challenge: &[u8])
        -> Result<VerifyAddressResponse, HostError>;

    /// The connection behind `peer_id` is gone; its id will not be reused.
    fn on_peer_closed(&self, peer_id: &str);
}
