//! Fake wallet

use async_trait::async_trait;
use handoff_common::ledger::{Error, Secret, Wallet};
use handoff_common::TokenRef;
use parking_lot::Mutex;
use tokio::sync::watch;

/// Notifications received by a [`FakeWallet`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalletLog {
    /// Ids passed to `token_sent`
    pub sent: Vec<String>,
    /// Tokens passed to `token_received`
    pub received: Vec<TokenRef>,
}

/// Wallet with a fixed secret that records notifications
#[derive(Debug)]
pub struct FakeWallet {
    secret: Mutex<Option<Secret>>,
    log: watch::Sender<WalletLog>,
}

impl Default for FakeWallet {
    fn default() -> Self {
        Self::new(b"fake wallet secret".to_vec())
    }
}

impl FakeWallet {
    /// Create a wallet holding `secret`
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        let (log, _) = watch::channel(WalletLog::default());
        Self {
            secret: Mutex::new(Some(Secret::new(secret))),
            log,
        }
    }

    /// Create a wallet that cannot provide its secret
    pub fn locked() -> Self {
        let wallet = Self::default();
        *wallet.secret.lock() = None;
        wallet
    }

    /// Snapshot of the notifications so far
    pub fn log(&self) -> WalletLog {
        self.log.borrow().clone()
    }

    /// Watch notifications
    pub fn subscribe(&self) -> watch::Receiver<WalletLog> {
        self.log.subscribe()
    }
}

#[async_trait]
impl Wallet for FakeWallet {
    async fn secret(&self) -> Result<Secret, Error> {
        self.secret.lock().clone().ok_or(Error::SecretUnavailable)
    }

    async fn token_sent(&self, token_id: &str) {
        tracing::debug!("Fake wallet sent {}", token_id);
        self.log.send_modify(|log| log.sent.push(token_id.to_string()));
    }

    async fn token_received(&self, token: TokenRef) {
        tracing::debug!("Fake wallet received {}", token.id);
        self.log.send_modify(|log| log.received.push(token));
    }
}
