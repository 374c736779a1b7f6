//! Wire codec
//!
//! Every protocol message travels as a structured JSON envelope:
//!
//! ```json
//! { "type": "TRANSFER_REQUEST", "transferId": "<uuid>",
//!   "payload": { "tokenType": "<string>", "tokenId": "<string>" } }
//! ```
//!
//! Links with a tight single-message ceiling may also carry a compact textual
//! form of the approve, reject and detail-request control messages
//! (`TFER_APR:<id>`, `REJECT:<id>`, `TFER_REJ:<id>`, `TFER_DTL:<id>`).
//!
//! Decoding tries the structured form first, and only if the payload looks like
//! a JSON object. Everything else is matched against the compact prefixes.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TransferId;

/// Prefix of the minimal rejection frame
pub const REJECT_PREFIX: &str = "REJECT:";
/// Prefix of the compact approval frame
pub const APPROVE_PREFIX: &str = "TFER_APR:";
/// Prefix of the compact rejection frame
pub const DECLINE_PREFIX: &str = "TFER_REJ:";
/// Prefix of the compact detail request frame
pub const DETAILS_PREFIX: &str = "TFER_DTL:";

/// Codec Error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Payload is not UTF-8
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// Payload looked like JSON but is not a valid envelope
    #[error("Malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Envelope without transfer id
    #[error("Envelope has an empty transfer id")]
    EmptyTransferId,
    /// Payload matches no known format
    #[error("Unrecognized payload: `{0}`")]
    Unrecognized(String),
}

/// Message kind, the `type` field of the envelope
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Sender asks for permission
    #[serde(alias = "TRANSFER_PERMISSION_REQUEST")]
    PermissionRequest,
    /// Recipient answers the permission request
    #[serde(alias = "TRANSFER_PERMISSION_RESPONSE")]
    PermissionResponse,
    /// Sender asks for a receiving address
    TransferRequest,
    /// Recipient provides the receiving address
    AddressResponse,
    /// Sender delivers the transfer package
    TransferPackage,
    /// Recipient reports the outcome of finalization
    TransferComplete,
    /// Either side aborts the transfer
    TransferError,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::PermissionRequest => "PERMISSION_REQUEST",
            MessageKind::PermissionResponse => "PERMISSION_RESPONSE",
            MessageKind::TransferRequest => "TRANSFER_REQUEST",
            MessageKind::AddressResponse => "ADDRESS_RESPONSE",
            MessageKind::TransferPackage => "TRANSFER_PACKAGE",
            MessageKind::TransferComplete => "TRANSFER_COMPLETE",
            MessageKind::TransferError => "TRANSFER_ERROR",
        };
        f.write_str(s)
    }
}

/// `PERMISSION_REQUEST` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Display name of the sending device
    pub sender_name: String,
    /// Offered token type
    pub token_type: String,
    /// Offered token name
    pub token_name: String,
    /// Preview text for the approval dialog
    pub token_preview: String,
}

/// `PERMISSION_RESPONSE` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResponse {
    /// Whether the recipient accepted
    pub approved: bool,
}

/// `TRANSFER_REQUEST` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// Token type, used to mint a matching address
    pub token_type: String,
    /// Token id
    pub token_id: String,
}

/// `ADDRESS_RESPONSE` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressResponse {
    /// Recipient controlled receiving address
    pub address: String,
}

/// `TRANSFER_PACKAGE` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPackage {
    /// Encrypted ledger package
    #[serde(alias = "offlinePackage")]
    pub package: String,
}

/// `TRANSFER_COMPLETE` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferComplete {
    /// Whether the recipient finalized the package
    pub success: bool,
    /// Serialized received token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_json: Option<String>,
}

/// `TRANSFER_ERROR` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferError {
    /// Human readable reason
    #[serde(alias = "error")]
    pub reason: String,
}

/// Protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Permission request
    PermissionRequest(PermissionRequest),
    /// Permission response
    PermissionResponse(PermissionResponse),
    /// Transfer request
    TransferRequest(TransferRequest),
    /// Address response
    AddressResponse(AddressResponse),
    /// Transfer package
    TransferPackage(TransferPackage),
    /// Transfer complete
    TransferComplete(TransferComplete),
    /// Transfer error
    TransferError(TransferError),
}

impl Message {
    /// Kind of the message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::PermissionRequest(_) => MessageKind::PermissionRequest,
            Message::PermissionResponse(_) => MessageKind::PermissionResponse,
            Message::TransferRequest(_) => MessageKind::TransferRequest,
            Message::AddressResponse(_) => MessageKind::AddressResponse,
            Message::TransferPackage(_) => MessageKind::TransferPackage,
            Message::TransferComplete(_) => MessageKind::TransferComplete,
            Message::TransferError(_) => MessageKind::TransferError,
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Message::PermissionRequest(p) => serde_json::to_value(p),
            Message::PermissionResponse(p) => serde_json::to_value(p),
            Message::TransferRequest(p) => serde_json::to_value(p),
            Message::AddressResponse(p) => serde_json::to_value(p),
            Message::TransferPackage(p) => serde_json::to_value(p),
            Message::TransferComplete(p) => serde_json::to_value(p),
            Message::TransferError(p) => serde_json::to_value(p),
        }
    }

    fn from_payload(kind: MessageKind, payload: Value) -> Result<Self, serde_json::Error> {
        fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, serde_json::Error> {
            serde_json::from_value(payload)
        }

        Ok(match kind {
            MessageKind::PermissionRequest => Message::PermissionRequest(parse(payload)?),
            MessageKind::PermissionResponse => Message::PermissionResponse(parse(payload)?),
            MessageKind::TransferRequest => Message::TransferRequest(parse(payload)?),
            MessageKind::AddressResponse => Message::AddressResponse(parse(payload)?),
            MessageKind::TransferPackage => Message::TransferPackage(parse(payload)?),
            MessageKind::TransferComplete => Message::TransferComplete(parse(payload)?),
            MessageKind::TransferError => Message::TransferError(parse(payload)?),
        })
    }
}

/// Structured envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Transfer the message belongs to
    pub transfer_id: TransferId,
    /// Message
    pub message: Message,
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(rename = "transferId")]
    transfer_id: TransferId,
    #[serde(default)]
    payload: Value,
}

impl Envelope {
    /// Create a new envelope
    pub fn new(transfer_id: TransferId, message: Message) -> Self {
        Self {
            transfer_id,
            message,
        }
    }

    /// Kind of the wrapped message
    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    /// Serialize to the structured JSON form
    pub fn to_json(&self) -> Result<String, Error> {
        let wire = WireEnvelope {
            kind: self.kind(),
            transfer_id: self.transfer_id.clone(),
            payload: self.message.payload()?,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Serialize to bytes
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(self.to_json()?.into_bytes())
    }

    /// Parse the structured JSON form
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let wire: WireEnvelope = serde_json::from_str(json)?;
        if wire.transfer_id.trim().is_empty() {
            return Err(Error::EmptyTransferId);
        }
        Ok(Self {
            transfer_id: wire.transfer_id,
            message: Message::from_payload(wire.kind, wire.payload)?,
        })
    }

    /// Compact equivalent of this envelope, if its kind has one
    pub fn compact(&self) -> Option<CompactFrame> {
        match &self.message {
            Message::PermissionResponse(PermissionResponse { approved: true }) => {
                Some(CompactFrame::Approve(self.transfer_id.clone()))
            }
            Message::PermissionResponse(PermissionResponse { approved: false }) => {
                Some(CompactFrame::Reject(self.transfer_id.clone()))
            }
            _ => None,
        }
    }
}

/// Compact control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactFrame {
    /// `REJECT:<id>`
    Reject(TransferId),
    /// `TFER_APR:<id>`
    Approve(TransferId),
    /// `TFER_REJ:<id>`
    Decline(TransferId),
    /// `TFER_DTL:<id>`
    Details(TransferId),
}

impl CompactFrame {
    /// Transfer id carried by the frame
    pub fn transfer_id(&self) -> &TransferId {
        match self {
            CompactFrame::Reject(id)
            | CompactFrame::Approve(id)
            | CompactFrame::Decline(id)
            | CompactFrame::Details(id) => id,
        }
    }

    /// Serialize to bytes
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for CompactFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompactFrame::Reject(id) => write!(f, "{REJECT_PREFIX}{id}"),
            CompactFrame::Approve(id) => write!(f, "{APPROVE_PREFIX}{id}"),
            CompactFrame::Decline(id) => write!(f, "{DECLINE_PREFIX}{id}"),
            CompactFrame::Details(id) => write!(f, "{DETAILS_PREFIX}{id}"),
        }
    }
}

impl FromStr for CompactFrame {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unrecognized = || Error::Unrecognized(preview(s));
        let parse_id = |rest: &str| TransferId::from_str(rest).map_err(|_| unrecognized());

        if let Some(rest) = s.strip_prefix(REJECT_PREFIX) {
            Ok(CompactFrame::Reject(parse_id(rest)?))
        } else if let Some(rest) = s.strip_prefix(APPROVE_PREFIX) {
            Ok(CompactFrame::Approve(parse_id(rest)?))
        } else if let Some(rest) = s.strip_prefix(DECLINE_PREFIX) {
            Ok(CompactFrame::Decline(parse_id(rest)?))
        } else if let Some(rest) = s.strip_prefix(DETAILS_PREFIX) {
            Ok(CompactFrame::Details(parse_id(rest)?))
        } else {
            Err(unrecognized())
        }
    }
}

/// Result of decoding an inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A protocol message, from either encoding
    Envelope(Envelope),
    /// The counterpart asks for the details of a pending offer again
    DetailRequest(TransferId),
}

impl Decoded {
    /// Transfer id the payload refers to
    pub fn transfer_id(&self) -> &TransferId {
        match self {
            Decoded::Envelope(envelope) => &envelope.transfer_id,
            Decoded::DetailRequest(id) => id,
        }
    }
}

impl From<CompactFrame> for Decoded {
    fn from(frame: CompactFrame) -> Self {
        let response = |transfer_id, approved| {
            Decoded::Envelope(Envelope::new(
                transfer_id,
                Message::PermissionResponse(PermissionResponse { approved }),
            ))
        };

        match frame {
            CompactFrame::Approve(id) => response(id, true),
            CompactFrame::Reject(id) | CompactFrame::Decline(id) => response(id, false),
            CompactFrame::Details(id) => Decoded::DetailRequest(id),
        }
    }
}

fn preview(s: &str) -> String {
    s.chars().take(64).collect()
}

/// Decode an inbound payload
pub fn decode(bytes: &[u8]) -> Result<Decoded, Error> {
    let text = std::str::from_utf8(bytes)?.trim();

    let mut structured_error = None;
    if text.starts_with('{') && text.ends_with('}') {
        match Envelope::from_json(text) {
            Ok(envelope) => return Ok(Decoded::Envelope(envelope)),
            Err(err) => {
                tracing::debug!("Structured decoding failed, trying compact forms: {}", err);
                structured_error = Some(err);
            }
        }
    }

    match CompactFrame::from_str(text) {
        Ok(frame) => Ok(frame.into()),
        Err(err) => Err(structured_error.unwrap_or(err)),
    }
}
