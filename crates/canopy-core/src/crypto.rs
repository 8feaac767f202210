//! Cryptographic primitives for Canopy.
//!
//! Provides three things:
//!   1. Keccak-256 hashing — transaction identity, challenge digests, addresses
//!   2. Recoverable secp256k1 signatures — a signer's address can be recovered
//!      from any hash + signature pair, so a tx never carries its public key
//!   3. Sealing — one-shot X25519 + XChaCha20-Poly1305 encryption of private
//!      transactions to a single recipient
//!
//! Private key material is zeroized on drop (k256 and x25519-dalek both wipe
//! their secrets; exported bytes are handed out as `Zeroizing`).
//! There is no unsafe code in this module.

use std::fmt;

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::encoding::{hex_array, hex_bytes};

// ── Identifiers ───────────────────────────────────────────────────────────────

/// A 32-byte Keccak-256 content digest.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(#[serde(with = "hex_array")] pub [u8; 32]);

impl Hash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short form for log lines.
    pub fn pretty(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.pretty())
    }
}

/// A 20-byte account address: the last 20 bytes of Keccak-256 over the
/// uncompressed public key (without the 0x04 tag).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(#[serde(with = "hex_array")] pub [u8; 20]);

impl Address {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Parse a hex address, with or without `0x`.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut out = [0u8; 20];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)
            .map_err(|_| CryptoError::InvalidAddress(s.to_string()))?;
        Ok(Self(out))
    }

    pub fn pretty(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Recoverable ECDSA signature, `r || s || v` (65 bytes).
/// An empty signature means "unsigned".
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "hex_bytes")] pub Vec<u8>);

impl Signature {
    pub const LEN: usize = 65;

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Signature(<unsigned>)")
        } else {
            write!(f, "Signature({}..)", hex::encode(&self.0[..self.0.len().min(6)]))
        }
    }
}

// ── Hashing ───────────────────────────────────────────────────────────────────

/// Keccak-256 over a byte slice.
pub fn hash_bytes(data: &[u8]) -> Hash {
    let mut h = Hasher::new();
    h.update(data);
    h.finalize()
}

/// Incremental Keccak-256 hasher for values hashed field by field.
pub struct Hasher(Keccak256);

impl Hasher {
    pub fn new() -> Self {
        Self(Keccak256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash(self.0.finalize().into())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Size of the random challenge used by address verification.
pub const CHALLENGE_LEN: usize = 128;

/// Generate a fresh random challenge.
pub fn generate_challenge() -> Vec<u8> {
    let mut challenge = vec![0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

// ── Signing ───────────────────────────────────────────────────────────────────

/// A node's long-term secp256k1 signing identity.
pub struct SigningKeypair {
    key: SigningKey,
    address: Address,
}

impl SigningKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self::from_key(SigningKey::random(&mut rand::thread_rng()))
    }

    /// Reconstruct from stored private key bytes.
    pub fn from_private(private_bytes: &[u8]) -> Result<Self, CryptoError> {
        let key = SigningKey::from_slice(private_bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_key(key))
    }

    fn from_key(key: SigningKey) -> Self {
        let address = SigningPublicKey(key.verifying_key().clone()).address();
        Self { key, address }
    }

    /// Serialize the private key for persistent storage.
    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.key.to_bytes().into())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> SigningPublicKey {
        SigningPublicKey(self.key.verifying_key().clone())
    }

    /// Sign a 32-byte digest. The result recovers to `self.address()`.
    pub fn sign_hash(&self, hash: &Hash) -> Result<Signature, CryptoError> {
        let (sig, recid) = self
            .key
            .sign_prehash_recoverable(hash.as_bytes())
            .map_err(|_| CryptoError::SigningFailed)?;

        let mut out = Vec::with_capacity(Signature::LEN);
        out.extend_from_slice(&sig.to_bytes());
        out.push(recid.to_byte());
        Ok(Signature(out))
    }
}

/// A secp256k1 public key recovered from, or belonging to, a signer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningPublicKey(VerifyingKey);

impl SigningPublicKey {
    pub fn address(&self) -> Address {
        let point = self.0.to_encoded_point(false);
        let digest = hash_bytes(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest.0[12..]);
        Address(address)
    }
}

/// Recover the public key that produced `sig` over `hash`.
pub fn recover_signing_pubkey(hash: &Hash, sig: &Signature) -> Result<SigningPublicKey, CryptoError> {
    let bytes = sig.as_bytes();
    if bytes.len() != Signature::LEN {
        return Err(CryptoError::InvalidSignatureLength(bytes.len()));
    }

    // Accept both 0/1 and Ethereum-style 27/28 recovery bytes.
    let v = match bytes[64] {
        27 | 28 => bytes[64] - 27,
        v => v,
    };
    let recid = RecoveryId::from_byte(v).ok_or(CryptoError::InvalidRecoveryId(bytes[64]))?;
    let ecdsa = EcdsaSignature::from_slice(&bytes[..64]).map_err(|_| CryptoError::MalformedSignature)?;

    let key = VerifyingKey::recover_from_prehash(hash.as_bytes(), &ecdsa, recid)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(SigningPublicKey(key))
}

// ── Sealing ───────────────────────────────────────────────────────────────────

/// Domain separation string for the sealing key derivation.
const SEAL_CONTEXT: &str = "canopy 2024 private tx seal v1";

const EPHEMERAL_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// An X25519 public key that private transactions are sealed to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncryptingPublicKey(#[serde(with = "hex_array")] pub [u8; 32]);

impl EncryptingPublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKeyLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptingPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptingPublicKey({})", hex::encode(&self.0[..6]))
    }
}

/// A node's long-term X25519 keypair for receiving private transactions.
pub struct EncryptingKeypair {
    secret: StaticSecret,
    public: EncryptingPublicKey,
}

impl EncryptingKeypair {
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(rand::thread_rng()))
    }

    pub fn from_private(private_bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(private_bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = EncryptingPublicKey(*PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    pub fn private_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.secret.to_bytes())
    }

    pub fn public_key(&self) -> EncryptingPublicKey {
        self.public
    }

    /// Seal `plaintext` so only the holder of `recipient`'s private key can
    /// open it.
    ///
    /// Output layout: `ephemeral_pub(32) || nonce(24) || ciphertext+tag`.
    /// A fresh ephemeral key is used per message, so sealing the same
    /// plaintext twice yields unrelated blobs.
    pub fn seal_message_for(
        &self,
        recipient: &EncryptingPublicKey,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = StaticSecret::random_from_rng(rand::thread_rng());
        let ephemeral_pub = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient.0));

        let key = derive_seal_key(shared.as_bytes(), ephemeral_pub.as_bytes(), &recipient.0);
        let cipher = XChaCha20Poly1305::new((&*key).into());

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::SealFailed)?;

        let mut out = Vec::with_capacity(EPHEMERAL_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(ephemeral_pub.as_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Open a blob produced by `seal_message_for` addressed to this keypair.
    pub fn open_message(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < EPHEMERAL_LEN + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::SealedTooShort(sealed.len()));
        }
        let (ephemeral_pub, rest) = sealed.split_at(EPHEMERAL_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let mut eph = [0u8; 32];
        eph.copy_from_slice(ephemeral_pub);
        let shared = self.secret.diffie_hellman(&PublicKey::from(eph));

        let key = derive_seal_key(shared.as_bytes(), &eph, &self.public.0);
        let cipher = XChaCha20Poly1305::new((&*key).into());
        cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::OpenFailed)
    }
}

/// key = BLAKE3-derive_key(context, shared || ephemeral_pub || recipient_pub)
fn derive_seal_key(shared: &[u8; 32], ephemeral_pub: &[u8; 32], recipient_pub: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let mut material = Zeroizing::new([0u8; 96]);
    material[..32].copy_from_slice(shared);
    material[32..64].copy_from_slice(ephemeral_pub);
    material[64..].copy_from_slice(recipient_pub);
    Zeroizing::new(blake3::derive_key(SEAL_CONTEXT, &*material))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("signing failed")]
    SigningFailed,

    #[error("signature must be {} bytes, got {0}", Signature::LEN)]
    InvalidSignatureLength(usize),

    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    #[error("malformed signature")]
    MalformedSignature,

    #[error("public key recovery failed")]
    RecoveryFailed,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("encrypting public key must be 32 bytes, got {0}")]
    InvalidPublicKeyLength(usize),

    #[error("sealing failed")]
    SealFailed,

    #[error("sealed message too short: {0} bytes")]
    SealedTooShort(usize),

    #[error("could not open sealed message")]
    OpenFailed,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
