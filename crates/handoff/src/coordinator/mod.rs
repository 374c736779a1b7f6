//! Transfer coordinator
//!
//! [`TransferCoordinator`] is a handle to a background worker. Operations
//! enqueue a command and resolve once the worker has applied it. They never
//! wait on the network: sends, retries and ledger work happen on separate
//! tasks and feed their results back through the same queue.

use std::fmt;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use handoff_common::{
    ApprovalRequest, Ledger, PeerId, PeerRecord, TokenRef, TransferId, TransferSession, Transport,
    TransportEvent, Wallet,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use self::outbox::Outbox;
use self::worker::{Command, Job, Worker};
use crate::approval::ApprovalQueue;
use crate::config::CoordinatorConfig;
use crate::error::Error;
use crate::peers::PeerDirectory;
use crate::sessions::{SessionTable, SessionView, StateMap};
use crate::timer::Timers;

mod outbox;
mod worker;

const DEFAULT_LOCAL_NAME: &str = "Unknown device";

/// Builder for a [`TransferCoordinator`]
pub struct CoordinatorBuilder {
    config: CoordinatorConfig,
    local_name: String,
    transport: Option<Arc<dyn Transport>>,
    ledger: Option<Arc<dyn Ledger>>,
    wallet: Option<Arc<dyn Wallet>>,
}

impl fmt::Debug for CoordinatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorBuilder")
            .field("config", &self.config)
            .field("local_name", &self.local_name)
            .finish()
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self {
            config: CoordinatorConfig::default(),
            local_name: DEFAULT_LOCAL_NAME.to_string(),
            transport: None,
            ledger: None,
            wallet: None,
        }
    }
}

impl CoordinatorBuilder {
    /// Create a new CoordinatorBuilder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timing and delivery settings
    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Name shown to recipients in permission requests
    pub fn local_name(mut self, local_name: impl Into<String>) -> Self {
        self.local_name = local_name.into();
        self
    }

    /// Set the mesh transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the ledger backend
    pub fn ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Set the owning wallet
    pub fn wallet(mut self, wallet: Arc<dyn Wallet>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Build the coordinator and start its worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<TransferCoordinator, Error> {
        let transport = self
            .transport
            .ok_or(Error::Custom("Transport required".to_string()))?;
        let ledger = self
            .ledger
            .ok_or(Error::Custom("Ledger required".to_string()))?;
        let wallet = self
            .wallet
            .ok_or(Error::Custom("Wallet required".to_string()))?;

        let config = Arc::new(self.config);
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let sessions = SessionTable::new();
        let approvals = ApprovalQueue::new();
        let peers = PeerDirectory::new();

        let coordinator = TransferCoordinator {
            sessions: sessions.view(),
            approvals: approvals.subscribe(),
            peers: peers.clone(),
            tx: tx.clone(),
            cancel: cancel.clone(),
            worker: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        };

        let worker = Worker {
            outbox: Outbox::new(transport, config.clone(), cancel.clone()),
            config,
            local_name: self.local_name,
            ledger,
            wallet,
            sessions,
            approvals,
            peers,
            timers: Timers::new(),
            tx,
            cancel,
        };

        *coordinator.worker.lock() = Some(tokio::spawn(worker.run(rx)));

        Ok(coordinator)
    }
}

/// Coordinates token transfers with mesh peers
///
/// Dropping the coordinator stops its worker and every task it spawned.
pub struct TransferCoordinator {
    sessions: SessionView,
    approvals: watch::Receiver<Vec<ApprovalRequest>>,
    peers: PeerDirectory,
    tx: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for TransferCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferCoordinator")
            .field("transfers", &self.sessions.ids())
            .field("running", &self.is_running())
            .finish()
    }
}

impl TransferCoordinator {
    /// Create a new [`CoordinatorBuilder`]
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    async fn dispatch(&self, command: Command) -> Result<(), Error> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Job {
                command,
                ack: Some(ack),
            })
            .map_err(|_| Error::Stopped)?;
        done.await.map_err(|_| Error::Stopped)
    }

    /// Offer `token` to `counterpart_id`, asking for permission first
    pub async fn initiate_transfer(
        &self,
        token: TokenRef,
        counterpart_id: PeerId,
        counterpart_name: impl Into<String>,
    ) -> Result<TransferId, Error> {
        self.initiate(token, counterpart_id, counterpart_name.into(), false)
            .await
    }

    /// Send `token` to `counterpart_id` whose permission was obtained out of band
    pub async fn initiate_direct_transfer(
        &self,
        token: TokenRef,
        counterpart_id: PeerId,
    ) -> Result<TransferId, Error> {
        let counterpart_name = counterpart_id.to_string();
        self.initiate(token, counterpart_id, counterpart_name, true)
            .await
    }

    async fn initiate(
        &self,
        token: TokenRef,
        counterpart_id: PeerId,
        counterpart_name: String,
        direct: bool,
    ) -> Result<TransferId, Error> {
        if counterpart_id.is_empty() {
            return Err(Error::EmptyCounterpart);
        }

        let transfer_id = TransferId::generate();
        self.dispatch(Command::Initiate {
            transfer_id: transfer_id.clone(),
            token,
            counterpart_id,
            counterpart_name,
            direct,
        })
        .await?;

        Ok(transfer_id)
    }

    /// Accept a pending permission request
    pub async fn approve_transfer(&self, transfer_id: &TransferId) -> Result<(), Error> {
        self.dispatch(Command::Approve(transfer_id.clone())).await
    }

    /// Decline a pending permission request
    pub async fn reject_transfer(&self, transfer_id: &TransferId) -> Result<(), Error> {
        self.dispatch(Command::Reject(transfer_id.clone())).await
    }

    /// Drop a pending permission request without answering it
    pub async fn clear_approval(&self, transfer_id: &TransferId) -> Result<(), Error> {
        self.dispatch(Command::ClearApproval(transfer_id.clone()))
            .await
    }

    /// Feed a payload received from `from`
    pub async fn handle_incoming_message(&self, bytes: &[u8], from: PeerId) -> Result<(), Error> {
        self.dispatch(Command::Incoming {
            bytes: bytes.to_vec(),
            from,
        })
        .await
    }

    /// Record a discovered peer
    pub async fn peer_discovered(
        &self,
        peer_id: PeerId,
        display_name: impl Into<String>,
    ) -> Result<(), Error> {
        self.dispatch(Command::PeerDiscovered {
            peer_id,
            display_name: display_name.into(),
        })
        .await
    }

    /// Pump a transport's inbound events into the coordinator
    ///
    /// Runs until the stream ends or the coordinator stops.
    pub fn listen<S>(&self, events: S)
    where
        S: Stream<Item = TransportEvent> + Send + 'static,
    {
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();

        let listener = tokio::spawn(async move {
            let mut events = Box::pin(events);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.next() => {
                        let command = match event {
                            Some(TransportEvent::MessageReceived { from, bytes }) => {
                                Command::Incoming { bytes, from }
                            }
                            Some(TransportEvent::PeerDiscovered { peer_id, display_name }) => {
                                Command::PeerDiscovered { peer_id, display_name }
                            }
                            None => break,
                        };

                        if tx.send(Job::new(command)).is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Transport listener ended");
        });

        self.listeners.lock().push(listener);
    }

    /// Snapshot of a session
    pub fn get_session(&self, transfer_id: &TransferId) -> Option<TransferSession> {
        self.sessions.get(transfer_id)
    }

    /// Ids of the sessions not yet cleaned up
    pub fn list_active_transfer_ids(&self) -> Vec<TransferId> {
        self.sessions.ids()
    }

    /// Permission requests waiting for a decision, oldest first
    pub fn list_pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.approvals.borrow().clone()
    }

    /// Known peers, most recently seen first
    pub fn list_peers(&self) -> Vec<PeerRecord> {
        self.peers.list()
    }

    /// Watch the state of every live transfer
    pub fn subscribe_transfer_states(&self) -> watch::Receiver<StateMap> {
        self.sessions.subscribe()
    }

    /// Watch the pending approval requests
    pub fn subscribe_pending_approvals(&self) -> watch::Receiver<Vec<ApprovalRequest>> {
        self.approvals.clone()
    }

    /// Whether the worker is still running
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    /// Stop the coordinator
    ///
    /// Cancels every timer and pending send, and clears all sessions and
    /// approval requests. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.dispatch(Command::Shutdown).await.is_err() {
            tracing::trace!("Coordinator already stopped");
        }
        self.cancel.cancel();

        for listener in self.listeners.lock().drain(..) {
            listener.abort();
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                if !err.is_cancelled() {
                    tracing::error!("Coordinator worker failed: {}", err);
                }
            }
        }
    }
}

impl Drop for TransferCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
        for listener in self.listeners.lock().drain(..) {
            listener.abort();
        }
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
    }
}
