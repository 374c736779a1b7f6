//! Mesh handoff coordinator
//!
//! Drives the negotiation that moves a single token from one device to another
//! over an unreliable, possibly delayed mesh link:
//!
//! permission request, approval or rejection, receiving address exchange,
//! transfer package delivery and completion acknowledgement.
//!
//! The coordinator is an actor. Every public operation on
//! [`TransferCoordinator`] is turned into a command handled by a single
//! background worker, so session state is never mutated concurrently. Ledger
//! work and network sends run on their own tasks and report back to the
//! worker.
//!
//! ```ignore
//! let coordinator = CoordinatorBuilder::new()
//!     .local_name("Pixel 8")
//!     .transport(transport)
//!     .ledger(ledger)
//!     .wallet(wallet)
//!     .build()?;
//!
//! let transfer_id = coordinator
//!     .initiate_transfer(token, peer_id, "Bob's phone")
//!     .await?;
//! ```

pub mod approval;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod peers;
pub mod sessions;
pub mod timer;

pub use handoff_common as common;

pub use self::config::CoordinatorConfig;
pub use self::coordinator::{CoordinatorBuilder, TransferCoordinator};
pub use self::error::Error;
