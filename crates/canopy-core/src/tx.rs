//! Transaction model.
//!
//! A transaction is identified by the Keccak-256 of its canonical fields.
//! The signature, sender and recipient list are not part of that identity:
//! signing a tx never changes its hash, and the same hash is what gets
//! signed.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_bytes, recover_signing_pubkey, Address, CryptoError, Hash, Hasher, Signature};

/// A signed, content-addressed unit of change directed at a resource (`url`)
/// or, when `recipients` is non-empty, at a set of addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tx {
    /// Caller-chosen identifier, usually random.
    pub id: Hash,

    /// Transactions this one builds on.
    #[serde(default)]
    pub parents: Vec<Hash>,

    /// Claimed author. Informational; the signature is what proves authorship.
    #[serde(default)]
    pub from: Address,

    /// Empty until signed.
    #[serde(default)]
    pub sig: Signature,

    /// Resource this tx applies to.
    #[serde(default)]
    pub url: String,

    /// Opaque patch payloads, applied in order by whatever consumes the stream.
    #[serde(default)]
    pub patches: Vec<String>,

    /// Non-empty means private: delivered sealed, per recipient, never broadcast.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<Address>,
}

impl Tx {
    /// Build an unsigned public tx with a random id.
    pub fn new(url: impl Into<String>, patches: Vec<String>) -> Self {
        Self {
            id: random_id(),
            url: url.into(),
            patches,
            ..Default::default()
        }
    }

    /// Deterministic content hash: `keccak(id || parents.. || url || patches..)`.
    pub fn hash(&self) -> Hash {
        let mut h = Hasher::new();
        h.update(self.id.as_bytes());
        for parent in &self.parents {
            h.update(parent.as_bytes());
        }
        h.update(self.url.as_bytes());
        for patch in &self.patches {
            h.update(patch.as_bytes());
        }
        h.finalize()
    }

    pub fn is_signed(&self) -> bool {
        !self.sig.is_empty()
    }

    pub fn is_private(&self) -> bool {
        !self.recipients.is_empty()
    }

    /// Address the signature recovers to.
    pub fn signer(&self) -> Result<Address, CryptoError> {
        Ok(recover_signing_pubkey(&self.hash(), &self.sig)?.address())
    }

    /// Serialize for sealing into a private message.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// A random 32-byte id, hashed so ids look uniform regardless of RNG quirks.
pub fn random_id() -> Hash {
    hash_bytes(&crate::crypto::generate_challenge())
}
