//! Mesh handoff shared types and functions.
//!
//! This crate is the base foundation for the mesh handoff workspace. It holds the
//! data model of a token handoff negotiation, the wire codec used between two
//! devices, the state transition rules and the traits implemented by the
//! external collaborators (transport, ledger and wallet).
//!
//! It performs no I/O on its own.

pub mod codec;
pub mod error;
pub mod ledger;
pub mod retry;
pub mod state;
pub mod transport;
pub mod types;
pub mod util;

pub use self::codec::{CompactFrame, Decoded, Envelope, Message, MessageKind};
pub use self::error::Error;
pub use self::ledger::{Ledger, Secret, Wallet};
pub use self::retry::RetryPolicy;
pub use self::transport::{Transport, TransportCapabilities, TransportEvent};
pub use self::types::{
    ApprovalRequest, PeerId, PeerRecord, Role, TokenRef, TransferId, TransferSession,
    TransferState,
};
