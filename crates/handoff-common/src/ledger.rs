//! Ledger and wallet collaborators
//!
//! The coordinator never touches token cryptography itself. Address minting,
//! package building and finalization are delegated to a [`Ledger`], and the
//! owning wallet is told about finished transfers through [`Wallet`].

use std::fmt;

use async_trait::async_trait;
use zeroize::Zeroize;

use crate::types::TokenRef;

/// Ledger Error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token type cannot be handled by this ledger
    #[error("Unsupported token type: `{0}`")]
    UnsupportedTokenType(String),
    /// Package could not be parsed or verified
    #[error("Invalid transfer package: {0}")]
    InvalidPackage(String),
    /// Wallet identity is unavailable
    #[error("Wallet secret unavailable")]
    SecretUnavailable,
    /// Custom error
    #[error("`{0}`")]
    Custom(String),
    /// Anyhow error
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Wallet identity material used to sign transfer packages
///
/// Erased from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Vec<u8>);

impl Secret {
    /// Create a new secret
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Secret bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&"[REDACTED]").finish()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Ledger backend
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Mint a fresh receiving address for a token of `token_type`
    async fn mint_receiving_address(&self, token_type: &str, token_id: &str)
        -> Result<String, Error>;

    /// Build a package that moves `token` to `destination`
    async fn build_transfer_package(
        &self,
        token: &TokenRef,
        destination: &str,
        secret: &Secret,
    ) -> Result<String, Error>;

    /// Finalize a received package into a token owned by this wallet
    async fn finalize_transfer_package(
        &self,
        package: &str,
        secret: &Secret,
    ) -> Result<TokenRef, Error>;
}

/// Wallet owning the tokens
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Identity material for package building and finalization
    async fn secret(&self) -> Result<Secret, Error>;

    /// A sent token left this wallet
    async fn token_sent(&self, token_id: &str);

    /// A token was received into this wallet
    async fn token_received(&self, token: TokenRef);
}
