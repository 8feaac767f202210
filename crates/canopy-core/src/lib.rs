//! canopy-core — shared types, wire format, and cryptographic primitives.
//! All other Canopy crates depend on this one.

pub mod config;
pub mod crypto;
pub mod encoding;
pub mod tx;
pub mod wire;

pub use crypto::{Address, EncryptingKeypair, EncryptingPublicKey, Hash, Signature, SigningKeypair};
pub use tx::Tx;
pub use wire::{Msg, MsgType, VerifyAddressResponse, WireError};
