//! Host error taxonomy.

use canopy_core::crypto::{Address, CryptoError};
use canopy_core::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A signature was required and is missing, or signing failed.
    #[error("unsigned tx")]
    UnsignedTx,

    /// The peer sent something other than what the exchange expects.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no peers provide {0}")]
    NoPeersForUrl(String),

    /// Recovered signer does not match the claimed address.
    #[error("invalid signature: expected {expected}, recovered {recovered}")]
    InvalidSignature { expected: Address, recovered: Address },

    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),

    #[error("not subscribed to {0}")]
    NotSubscribed(String),

    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,

    /// Fan-out reached every target but some of them failed.
    #[error("{failed} of {attempted} deliveries failed")]
    PartialDelivery { failed: usize, attempted: usize },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("store: {0:#}")]
    Store(anyhow::Error),

    #[error("transport: {0:#}")]
    Transport(anyhow::Error),
}
