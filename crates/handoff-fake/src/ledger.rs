//! Fake ledger
//!
//! Packages are plain JSON documents naming the token and its destination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use handoff_common::ledger::{Error, Ledger, Secret};
use handoff_common::TokenRef;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Which ledger steps fail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerFaults {
    /// Address minting fails
    pub fail_mint: bool,
    /// Package building fails
    pub fail_build: bool,
    /// Package finalization fails
    pub fail_finalize: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct FakePackage {
    token: TokenRef,
    destination: String,
}

/// In-memory ledger
#[derive(Debug, Default)]
pub struct FakeLedger {
    faults: Mutex<LedgerFaults>,
    delay: Mutex<Duration>,
    mint_calls: AtomicUsize,
    build_calls: AtomicUsize,
    finalize_calls: AtomicUsize,
}

impl FakeLedger {
    /// Create a ledger where every step succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger with `faults`
    pub fn with_faults(faults: LedgerFaults) -> Self {
        let ledger = Self::default();
        ledger.set_faults(faults);
        ledger
    }

    /// Replace the fault switches
    pub fn set_faults(&self, faults: LedgerFaults) {
        *self.faults.lock() = faults;
    }

    /// Make every call take `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of address minting calls
    pub fn mint_calls(&self) -> usize {
        self.mint_calls.load(Ordering::SeqCst)
    }

    /// Number of package building calls
    pub fn build_calls(&self) -> usize {
        self.build_calls.load(Ordering::SeqCst)
    }

    /// Number of finalization calls
    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn mint_receiving_address(
        &self,
        token_type: &str,
        token_id: &str,
    ) -> Result<String, Error> {
        self.mint_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.faults.lock().fail_mint {
            return Err(Error::Custom("Fake address minting failure".to_string()));
        }

        tracing::debug!("Minting fake address for {} `{}`", token_type, token_id);
        Ok(format!("FAKE://{:016x}", rand::random::<u64>()))
    }

    async fn build_transfer_package(
        &self,
        token: &TokenRef,
        destination: &str,
        secret: &Secret,
    ) -> Result<String, Error> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.faults.lock().fail_build {
            return Err(Error::Custom("Fake package building failure".to_string()));
        }
        if secret.as_bytes().is_empty() {
            return Err(Error::SecretUnavailable);
        }

        let package = FakePackage {
            token: token.clone(),
            destination: destination.to_string(),
        };
        serde_json::to_string(&package).map_err(|err| Error::Anyhow(err.into()))
    }

    async fn finalize_transfer_package(
        &self,
        package: &str,
        secret: &Secret,
    ) -> Result<TokenRef, Error> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if self.faults.lock().fail_finalize {
            return Err(Error::Custom("Fake finalization failure".to_string()));
        }
        if secret.as_bytes().is_empty() {
            return Err(Error::SecretUnavailable);
        }

        let package: FakePackage =
            serde_json::from_str(package).map_err(|err| Error::InvalidPackage(err.to_string()))?;

        if !package.destination.starts_with("FAKE://") {
            return Err(Error::InvalidPackage(format!(
                "Unknown destination {}",
                package.destination
            )));
        }

        Ok(package.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_package_round_trip() {
        let ledger = FakeLedger::new();
        let secret = Secret::new(vec![1, 2, 3]);
        let token = TokenRef::new("t1", "Unicity Token", "Gold", "{}");

        let address = ledger
            .mint_receiving_address(&token.token_type, &token.id)
            .await
            .unwrap();
        let package = ledger
            .build_transfer_package(&token, &address, &secret)
            .await
            .unwrap();
        let received = ledger
            .finalize_transfer_package(&package, &secret)
            .await
            .unwrap();

        assert_eq!(received, token);
        assert_eq!(ledger.mint_calls(), 1);
        assert_eq!(ledger.build_calls(), 1);
        assert_eq!(ledger.finalize_calls(), 1);
    }

    #[tokio::test]
    async fn test_faults() {
        let ledger = FakeLedger::with_faults(LedgerFaults {
            fail_mint: true,
            ..Default::default()
        });
        assert!(ledger.mint_receiving_address("x", "y").await.is_err());

        ledger.set_faults(LedgerFaults::default());
        assert!(ledger.mint_receiving_address("x", "y").await.is_ok());

        let secret = Secret::new(vec![1]);
        assert!(matches!(
            ledger.finalize_transfer_package("not json", &secret).await,
            Err(Error::InvalidPackage(_))
        ));
    }
}
