//! Canopy wire format — the framed, typed message exchanged between peers.
//!
//! Every message on a connection is:
//!
//!   [8 bytes, little-endian u64: body length N][N bytes: JSON body]
//!
//! The body is `{"type": <string>, "payload": <shape keyed by type>}`.
//! These type strings ARE the protocol; renaming one is a breaking change.
//!
//! Decoding is explicit dispatch on `type` into the closed `Msg` enum.
//! An unknown `type` is `WireError::BadMessage` and the connection that sent
//! it should be treated as protocol-violating. A short read of either the
//! prefix or the body is an I/O error, not a protocol error.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::crypto::{Hash, Signature};
use crate::encoding::hex_bytes;
use crate::tx::Tx;

// ── Message types ─────────────────────────────────────────────────────────────

/// Discriminator carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Subscribe,
    Unsubscribe,
    Put,
    Private,
    Ack,
    Error,
    VerifyAddress,
    VerifyAddressResponse,
}

impl MsgType {
    pub fn as_str(self) -> &'static str {
        match self {
            MsgType::Subscribe => "subscribe",
            MsgType::Unsubscribe => "unsubscribe",
            MsgType::Put => "put",
            MsgType::Private => "private",
            MsgType::Ack => "ack",
            MsgType::Error => "error",
            MsgType::VerifyAddress => "verify address",
            MsgType::VerifyAddressResponse => "verify address response",
        }
    }
}

impl FromStr for MsgType {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "subscribe" => Ok(MsgType::Subscribe),
            "unsubscribe" => Ok(MsgType::Unsubscribe),
            "put" => Ok(MsgType::Put),
            "private" => Ok(MsgType::Private),
            "ack" => Ok(MsgType::Ack),
            "error" => Ok(MsgType::Error),
            "verify address" => Ok(MsgType::VerifyAddress),
            "verify address response" => Ok(MsgType::VerifyAddressResponse),
            other => Err(WireError::BadMessage(other.to_string())),
        }
    }
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to a `VerifyAddress` challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyAddressResponse {
    /// Signature over keccak(challenge) by the responder's signing key.
    pub signature: Signature,
    /// X25519 public key private transactions should be sealed to.
    #[serde(with = "hex_bytes")]
    pub encrypting_public_key: Vec<u8>,
}

/// One wire message. The variant is the `type`, the field is the `payload`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// Subscribe to a resource URL (bare string).
    Subscribe(String),
    /// Drop a subscription to a resource URL.
    Unsubscribe(String),
    /// A full public transaction. The receiving subscription re-annotates
    /// `url` from its own subscription.
    Put(Tx),
    /// A transaction sealed to the receiving node's encryption key.
    Private(Vec<u8>),
    /// Receipt of a tx, by hash.
    Ack(Hash),
    /// Human-readable failure report.
    Error(String),
    /// Random challenge bytes.
    VerifyAddress(Vec<u8>),
    VerifyAddressResponse(VerifyAddressResponse),
}

impl Msg {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Msg::Subscribe(_) => MsgType::Subscribe,
            Msg::Unsubscribe(_) => MsgType::Unsubscribe,
            Msg::Put(_) => MsgType::Put,
            Msg::Private(_) => MsgType::Private,
            Msg::Ack(_) => MsgType::Ack,
            Msg::Error(_) => MsgType::Error,
            Msg::VerifyAddress(_) => MsgType::VerifyAddress,
            Msg::VerifyAddressResponse(_) => MsgType::VerifyAddressResponse,
        }
    }

    fn payload(&self) -> Result<Value, WireError> {
        let value = match self {
            Msg::Subscribe(url) | Msg::Unsubscribe(url) => Value::String(url.clone()),
            Msg::Error(reason) => Value::String(reason.clone()),
            Msg::Put(tx) => serde_json::to_value(tx)?,
            Msg::Ack(hash) => serde_json::to_value(hash)?,
            Msg::Private(blob) | Msg::VerifyAddress(blob) => Value::String(hex::encode(blob)),
            Msg::VerifyAddressResponse(resp) => serde_json::to_value(resp)?,
        };
        Ok(value)
    }

    fn from_parts(kind: MsgType, payload: Value) -> Result<Self, WireError> {
        let bad = |e: serde_json::Error| WireError::BadPayload {
            kind,
            reason: e.to_string(),
        };
        let msg = match kind {
            MsgType::Subscribe => Msg::Subscribe(serde_json::from_value(payload).map_err(bad)?),
            MsgType::Unsubscribe => Msg::Unsubscribe(serde_json::from_value(payload).map_err(bad)?),
            MsgType::Error => Msg::Error(serde_json::from_value(payload).map_err(bad)?),
            MsgType::Put => Msg::Put(serde_json::from_value(payload).map_err(bad)?),
            MsgType::Ack => Msg::Ack(serde_json::from_value(payload).map_err(bad)?),
            MsgType::Private => Msg::Private(hex_payload(kind, payload)?),
            MsgType::VerifyAddress => Msg::VerifyAddress(hex_payload(kind, payload)?),
            MsgType::VerifyAddressResponse => {
                Msg::VerifyAddressResponse(serde_json::from_value(payload).map_err(bad)?)
            }
        };
        Ok(msg)
    }
}

fn hex_payload(kind: MsgType, payload: Value) -> Result<Vec<u8>, WireError> {
    let Value::String(s) = payload else {
        return Err(WireError::BadPayload {
            kind,
            reason: "expected a hex string".into(),
        });
    };
    hex::decode(s).map_err(|e| WireError::BadPayload {
        kind,
        reason: e.to_string(),
    })
}

#[derive(Serialize)]
struct OutEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: Value,
}

#[derive(Deserialize)]
struct InEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

// ── Body encoding ─────────────────────────────────────────────────────────────

/// Serialize a message body (no length prefix).
pub fn encode_body(msg: &Msg) -> Result<Vec<u8>, WireError> {
    let envelope = OutEnvelope {
        kind: msg.msg_type().as_str(),
        payload: msg.payload()?,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Parse a message body (no length prefix).
pub fn decode_body(body: &[u8]) -> Result<Msg, WireError> {
    let envelope: InEnvelope = serde_json::from_slice(body)?;
    let kind: MsgType = envelope.kind.parse()?;
    Msg::from_parts(kind, envelope.payload)
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Size of the little-endian length prefix.
pub const LEN_PREFIX: usize = 8;

/// Largest body a peer may announce. Larger frames are refused before the
/// body is allocated.
pub const MAX_FRAME_LEN: u64 = 16 * 1024 * 1024;

/// Encode a message as a complete frame: prefix + body.
pub fn encode(msg: &Msg) -> Result<Vec<u8>, WireError> {
    let body = encode_body(msg)?;
    let mut frame = Vec::with_capacity(LEN_PREFIX + body.len());
    frame.extend_from_slice(&(body.len() as u64).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode one complete frame from a byte buffer.
pub fn decode(frame: &[u8]) -> Result<Msg, WireError> {
    let mut reader = frame;
    let mut prefix = [0u8; LEN_PREFIX];
    std::io::Read::read_exact(&mut reader, &mut prefix)?;
    let len = check_len(u64::from_le_bytes(prefix))?;

    let mut body = vec![0u8; len];
    std::io::Read::read_exact(&mut reader, &mut body)?;
    decode_body(&body)
}

/// Write one framed message to an async stream.
pub async fn write_msg<W>(w: &mut W, msg: &Msg) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode(msg)?;
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Read one framed message from an async stream.
pub async fn read_msg<R>(r: &mut R) -> Result<Msg, WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LEN_PREFIX];
    r.read_exact(&mut prefix).await?;
    let len = check_len(u64::from_le_bytes(prefix))?;

    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    decode_body(&body)
}

fn check_len(len: u64) -> Result<usize, WireError> {
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    Ok(len as usize)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("bad message type {0:?}")]
    BadMessage(String),

    #[error("bad {kind} payload: {reason}")]
    BadPayload { kind: MsgType, reason: String },

    #[error("frame length {0} exceeds maximum {}", MAX_FRAME_LEN)]
    FrameTooLarge(u64),
}

impl WireError {
    /// True when the peer sent something it should not have, as opposed to
    /// the stream failing underneath us.
    pub fn is_protocol_violation(&self) -> bool {
        !matches!(self, WireError::Io(_))
    }

    /// True for a clean end-of-stream at a frame boundary or mid-frame.
    pub fn is_eof(&self) -> bool {
        matches!(self, WireError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
