//! Challenge/response proof that a peer holds the key behind an address.
//!
//! The verifier sends 128 random bytes; the responder signs keccak(challenge)
//! and returns the signature together with its X25519 public key. The proof
//! is per-session, so it is re-run on every lookup instead of cached.

use std::time::Duration;

use canopy_core::crypto::{
    generate_challenge, hash_bytes, recover_signing_pubkey, Address, EncryptingPublicKey,
    SigningKeypair,
};
use canopy_core::wire::{Msg, VerifyAddressResponse};
use tokio::time::timeout;

use crate::error::HostError;
use crate::transport::Peer;

pub struct AddressVerifier {
    timeout: Duration,
}

impl AddressVerifier {
    /// `timeout` bounds the wait for the response so a silent peer fails
    /// instead of stalling the caller.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Prove that `peer` controls `claimed`. On success the peer's address is
    /// recorded on it and its encryption key is returned.
    pub async fn verify(
        &self,
        peer: &dyn Peer,
        claimed: &Address,
    ) -> Result<EncryptingPublicKey, HostError> {
        let challenge = generate_challenge();
        peer.write_msg(&Msg::VerifyAddress(challenge.clone())).await?;

        let reply = match timeout(self.timeout, peer.read_msg()).await {
            Err(_) => {
                return Err(HostError::Protocol(format!(
                    "no verify address response within {:?}",
                    self.timeout
                )))
            }
            Ok(Err(e)) => return Err(HostError::Protocol(format!("reading verify address response: {e}"))),
            Ok(Ok(msg)) => msg,
        };

        let response = match reply {
            Msg::VerifyAddressResponse(r) => r,
            other => {
                return Err(HostError::Protocol(format!(
                    "expected verify address response, got {}",
                    other.msg_type()
                )))
            }
        };

        let recovered = recover_signing_pubkey(&hash_bytes(&challenge), &response.signature)?.address();
        if recovered != *claimed {
            return Err(HostError::InvalidSignature { expected: *claimed, recovered });
        }

        let key = EncryptingPublicKey::from_bytes(&response.encrypting_public_key)
            .map_err(|e| HostError::Protocol(format!("bad encrypting key: {e}")))?;

        peer.set_address(recovered);
        tracing::debug!(peer = %peer.id(), address = %recovered, "address verified");
        Ok(key)
    }
}

/// Responder side: sign keccak(challenge) and attach our encryption key.
pub fn respond(
    signing: &SigningKeypair,
    encrypting: &EncryptingPublicKey,
    challenge: &[u8],
) -> Result<VerifyAddressResponse, HostError> {
    let signature = signing.sign_hash(&hash_bytes(challenge))?;
    Ok(VerifyAddressResponse {
        signature,
        encrypting_public_key: encrypting.as_bytes().to_vec(),
    })
}
