//! Fake handoff collaborators
//!
//! Used for testing and local simulation. Nothing here talks to a real ledger
//! or radio:
//!
//! - [`FakeLedger`] mints random addresses and wraps tokens into plain JSON
//!   packages, with switches to make each step fail.
//! - [`FakeWallet`] hands out a fixed secret and records notifications.
//! - [`MeshHub`] connects any number of in-process endpoints, with per link
//!   fault injection (size limit, random loss, link down).
//! - [`RecordingTransport`] records every send attempt without delivering.

pub mod ledger;
pub mod mesh;
pub mod recording;
pub mod wallet;

pub use self::ledger::{FakeLedger, LedgerFaults};
pub use self::mesh::{LinkFaults, MeshEndpoint, MeshHub};
pub use self::recording::{RecordingTransport, SentFrame};
pub use self::wallet::{FakeWallet, WalletLog};
