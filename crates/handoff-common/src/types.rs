//! Handoff data model

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::util::unix_time;

/// Transfer Id
///
/// Correlation key of a single negotiation. Generated by the initiating side
/// and never reused.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Generate a fresh random transfer id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TransferId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::EmptyTransferId);
        }
        Ok(Self(s.to_string()))
    }
}

impl Deref for TransferId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Peer Id
///
/// Opaque transport address of a counterpart. The coordinator never looks
/// inside it.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a new peer id
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of the local device in a transfer
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Holds the token and hands it over
    Sender,
    /// Receives the token
    Recipient,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "SENDER"),
            Role::Recipient => write!(f, "RECIPIENT"),
        }
    }
}

/// Transfer state
///
/// Ordered roughly by protocol progress. `Completed`, `Rejected` and `Failed`
/// are terminal.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    /// Sender asked the recipient for permission
    RequestingPermission,
    /// Recipient accepted the offer
    Approved,
    /// Recipient declined the offer
    Rejected,
    /// Sender waits for the recipient's receiving address
    WaitingForAddress,
    /// Recipient is minting a receiving address
    GeneratingAddress,
    /// Sender is building the transfer package
    CreatingPackage,
    /// Sender handed the package to the transport
    SendingPackage,
    /// Recipient waits for the transfer package
    WaitingForPackage,
    /// Recipient is finalizing the package against the ledger
    CompletingTransfer,
    /// Transfer finished
    Completed,
    /// Transfer failed
    Failed,
}

impl TransferState {
    /// Whether no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Rejected | TransferState::Failed
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferState::RequestingPermission => "REQUESTING_PERMISSION",
            TransferState::Approved => "APPROVED",
            TransferState::Rejected => "REJECTED",
            TransferState::WaitingForAddress => "WAITING_FOR_ADDRESS",
            TransferState::GeneratingAddress => "GENERATING_ADDRESS",
            TransferState::CreatingPackage => "CREATING_PACKAGE",
            TransferState::SendingPackage => "SENDING_PACKAGE",
            TransferState::WaitingForPackage => "WAITING_FOR_PACKAGE",
            TransferState::CompletingTransfer => "COMPLETING_TRANSFER",
            TransferState::Completed => "COMPLETED",
            TransferState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl FromStr for TransferState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUESTING_PERMISSION" => Ok(TransferState::RequestingPermission),
            "APPROVED" => Ok(TransferState::Approved),
            "REJECTED" => Ok(TransferState::Rejected),
            "WAITING_FOR_ADDRESS" => Ok(TransferState::WaitingForAddress),
            "GENERATING_ADDRESS" => Ok(TransferState::GeneratingAddress),
            "CREATING_PACKAGE" => Ok(TransferState::CreatingPackage),
            "SENDING_PACKAGE" => Ok(TransferState::SendingPackage),
            "WAITING_FOR_PACKAGE" => Ok(TransferState::WaitingForPackage),
            "COMPLETING_TRANSFER" => Ok(TransferState::CompletingTransfer),
            "COMPLETED" => Ok(TransferState::Completed),
            "FAILED" => Ok(TransferState::Failed),
            _ => Err(Error::UnknownState(s.to_string())),
        }
    }
}

/// Reference to the asset being handed over
///
/// `data` is the ledger specific serialized token and is opaque to the
/// coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRef {
    /// Token id
    pub id: String,
    /// Token type
    pub token_type: String,
    /// Human readable name
    pub name: String,
    /// Serialized token
    #[serde(default)]
    pub data: String,
}

impl TokenRef {
    /// Create a new token reference
    pub fn new(
        id: impl Into<String>,
        token_type: impl Into<String>,
        name: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            token_type: token_type.into(),
            name: name.into(),
            data: data.into(),
        }
    }

    /// Preview text shown in the recipient's approval dialog
    pub fn preview(&self) -> String {
        format!("{}: {}", self.token_type, self.name)
    }
}

/// In-memory state of one negotiation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSession {
    /// Transfer id
    pub transfer_id: TransferId,
    /// Local role
    pub role: Role,
    /// Remote device
    pub counterpart_id: PeerId,
    /// Id of the token being moved, empty until a recipient learns it
    pub token_id: String,
    /// Token being sent (sender only)
    pub token: Option<TokenRef>,
    /// Package received from the sender (recipient only)
    pub pending_package: Option<String>,
    /// Current state
    pub state: TransferState,
    /// Creation time (unix seconds)
    pub created_at: u64,
}

impl TransferSession {
    /// New sender session for `token`
    pub fn sender(
        transfer_id: TransferId,
        counterpart_id: PeerId,
        token: TokenRef,
        state: TransferState,
    ) -> Self {
        Self {
            transfer_id,
            role: Role::Sender,
            counterpart_id,
            token_id: token.id.clone(),
            token: Some(token),
            pending_package: None,
            state,
            created_at: unix_time(),
        }
    }

    /// New recipient session
    pub fn recipient(
        transfer_id: TransferId,
        counterpart_id: PeerId,
        token_id: impl Into<String>,
        state: TransferState,
    ) -> Self {
        Self {
            transfer_id,
            role: Role::Recipient,
            counterpart_id,
            token_id: token_id.into(),
            token: None,
            pending_package: None,
            state,
            created_at: unix_time(),
        }
    }
}

/// Incoming permission request waiting for a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Transfer id
    pub transfer_id: TransferId,
    /// Device that offered the token
    pub sender_peer_id: PeerId,
    /// Display name of the offering device
    pub sender_name: String,
    /// Offered token type
    pub token_type: String,
    /// Offered token name
    pub token_name: String,
    /// Preview text
    pub token_preview: String,
    /// Reception time (unix seconds)
    pub received_at: u64,
}

/// Counterpart seen by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Transport address
    pub peer_id: PeerId,
    /// Advertised name
    pub display_name: String,
    /// Last discovery time (unix seconds)
    pub last_seen: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_string_round_trip() {
        let states = [
            TransferState::RequestingPermission,
            TransferState::Approved,
            TransferState::Rejected,
            TransferState::WaitingForAddress,
            TransferState::GeneratingAddress,
            TransferState::CreatingPackage,
            TransferState::SendingPackage,
            TransferState::WaitingForPackage,
            TransferState::CompletingTransfer,
            TransferState::Completed,
            TransferState::Failed,
        ];

        for state in states {
            let parsed = TransferState::from_str(&state.to_string()).unwrap();
            assert_eq!(parsed, state);

            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(TransferState::Completed.is_terminal());
        assert!(TransferState::Rejected.is_terminal());
        assert!(TransferState::Failed.is_terminal());
        assert!(!TransferState::Approved.is_terminal());
        assert!(!TransferState::SendingPackage.is_terminal());
    }

    #[test]
    fn test_transfer_id() {
        let a = TransferId::generate();
        let b = TransferId::generate();
        assert_ne!(a, b);

        assert!(TransferId::from_str("   ").is_err());
        assert_eq!(TransferId::from_str(" abc ").unwrap().as_str(), "abc");
    }

    #[test]
    fn test_token_preview() {
        let token = TokenRef::new("t1", "Unicity Token", "Gold Coin", "{}");
        assert_eq!(token.preview(), "Unicity Token: Gold Coin");
    }
}
