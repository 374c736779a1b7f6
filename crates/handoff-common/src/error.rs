//! Errors

use thiserror::Error;

/// Handoff common error
#[derive(Debug, Error)]
pub enum Error {
    /// Transfer id is empty
    #[error("Transfer id is empty")]
    EmptyTransferId,
    /// Unknown transfer state name
    #[error("Unknown transfer state: `{0}`")]
    UnknownState(String),
}
