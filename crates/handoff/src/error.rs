//! Coordinator errors

use thiserror::Error;

/// Coordinator Error
#[derive(Debug, Error)]
pub enum Error {
    /// Counterpart peer id is empty
    #[error("Counterpart peer id is empty")]
    EmptyCounterpart,
    /// Coordinator worker is no longer running
    #[error("Coordinator is stopped")]
    Stopped,
    /// Custom error
    #[error("`{0}`")]
    Custom(String),
}
