//! Coordinator worker
//!
//! Owns the session table, the approval queue and the timers. Commands are
//! handled strictly one at a time in arrival order.

use std::sync::Arc;

use handoff_common::codec::{
    AddressResponse, PermissionRequest, PermissionResponse, TransferComplete, TransferError,
    TransferPackage, TransferRequest,
};
use handoff_common::util::unix_time;
use handoff_common::{
    codec, ledger, ApprovalRequest, Decoded, Envelope, Ledger, Message, PeerId, Role, TokenRef,
    TransferId, TransferSession, TransferState, Wallet,
};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::outbox::{spawn_until_cancelled, Outbox};
use crate::approval::ApprovalQueue;
use crate::config::CoordinatorConfig;
use crate::peers::PeerDirectory;
use crate::sessions::SessionTable;
use crate::timer::{TimerKind, Timers};

/// Work item for the worker
#[derive(Debug)]
pub(super) struct Job {
    pub command: Command,
    /// Signalled once the command has been handled
    pub ack: Option<oneshot::Sender<()>>,
}

impl Job {
    pub fn new(command: Command) -> Self {
        Self { command, ack: None }
    }
}

/// Commands handled by the worker
#[derive(Debug)]
pub(super) enum Command {
    /// Offer `token` to a counterpart
    Initiate {
        transfer_id: TransferId,
        token: TokenRef,
        counterpart_id: PeerId,
        counterpart_name: String,
        /// Permission was already granted out of band
        direct: bool,
    },
    /// User accepted a pending request
    Approve(TransferId),
    /// User declined a pending request
    Reject(TransferId),
    /// Drop a pending request without answering
    ClearApproval(TransferId),
    /// Raw payload from the transport
    Incoming { bytes: Vec<u8>, from: PeerId },
    /// Peer seen by discovery
    PeerDiscovered { peer_id: PeerId, display_name: String },
    /// A timer elapsed
    TimerFired {
        transfer_id: TransferId,
        generation: u64,
    },
    /// Result of minting a receiving address
    AddressMinted {
        transfer_id: TransferId,
        result: Result<String, ledger::Error>,
    },
    /// Result of building the transfer package
    PackageBuilt {
        transfer_id: TransferId,
        result: Result<String, ledger::Error>,
    },
    /// Result of finalizing a received package
    PackageFinalized {
        transfer_id: TransferId,
        result: Result<TokenRef, ledger::Error>,
    },
    /// Stop the worker
    Shutdown,
}

pub(super) struct Worker {
    pub config: Arc<CoordinatorConfig>,
    pub local_name: String,
    pub ledger: Arc<dyn Ledger>,
    pub wallet: Arc<dyn Wallet>,
    pub outbox: Outbox,
    pub sessions: SessionTable,
    pub approvals: ApprovalQueue,
    pub peers: PeerDirectory,
    pub timers: Timers,
    /// Loop back into the worker's own queue
    pub tx: mpsc::UnboundedSender<Job>,
    pub cancel: CancellationToken,
}

impl Worker {
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Job>) {
        tracing::debug!("Starting transfer coordinator for {}", self.local_name);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Transfer coordinator cancelled");
                    break;
                }
                job = rx.recv() => {
                    let Some(Job { command, ack }) = job else {
                        break;
                    };

                    let stop = matches!(command, Command::Shutdown);
                    self.handle(command);

                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    if stop {
                        break;
                    }
                }
            }
        }

        self.stop();
        tracing::debug!("Transfer coordinator stopped");
    }

    fn stop(&mut self) {
        if !self.timers.is_empty() {
            tracing::debug!("Cancelling {} timers", self.timers.len());
        }
        self.timers.cancel_all();
        self.sessions.clear();
        self.approvals.clear();
        self.peers.clear();
        self.cancel.cancel();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Initiate {
                transfer_id,
                token,
                counterpart_id,
                counterpart_name,
                direct,
            } => {
                if direct {
                    self.initiate_direct(transfer_id, token, counterpart_id)
                } else {
                    self.initiate(transfer_id, token, counterpart_id, counterpart_name)
                }
            }
            Command::Approve(transfer_id) => self.approve(transfer_id),
            Command::Reject(transfer_id) => self.reject(transfer_id),
            Command::ClearApproval(transfer_id) => {
                if self.approvals.remove(&transfer_id).is_some() {
                    tracing::debug!("Cleared approval request {}", transfer_id);
                }
            }
            Command::Incoming { bytes, from } => self.incoming(bytes, from),
            Command::PeerDiscovered {
                peer_id,
                display_name,
            } => {
                tracing::trace!("Peer {} seen as `{}`", peer_id, display_name);
                self.peers.upsert(peer_id, display_name);
            }
            Command::TimerFired {
                transfer_id,
                generation,
            } => self.timer_fired(transfer_id, generation),
            Command::AddressMinted {
                transfer_id,
                result,
            } => self.address_minted(transfer_id, result),
            Command::PackageBuilt {
                transfer_id,
                result,
            } => self.package_built(transfer_id, result),
            Command::PackageFinalized {
                transfer_id,
                result,
            } => self.package_finalized(transfer_id, result),
            Command::Shutdown => self.stop(),
        }
    }

    fn send(&self, peer_id: &PeerId, transfer_id: &TransferId, message: Message) {
        self.outbox.send(peer_id, Envelope::new(transfer_id.clone(), message));
    }

    fn start_timer(&mut self, transfer_id: &TransferId, kind: TimerKind) {
        let delay = match kind {
            TimerKind::Approval => self.config.approval_timeout(),
            TimerKind::Transfer => self.config.transfer_timeout(),
            TimerKind::Cleanup => self.config.cleanup_delay(),
        };

        let tx = self.tx.clone();
        let id = transfer_id.clone();
        self.timers
            .start(transfer_id.clone(), kind, delay, move |generation| {
                let _ = tx.send(Job::new(Command::TimerFired {
                    transfer_id: id,
                    generation,
                }));
            });
    }

    /// Session of `role` in `state`, or `None` after logging why the event is dropped
    fn expect(
        &self,
        transfer_id: &TransferId,
        role: Role,
        state: TransferState,
        event: &str,
    ) -> Option<TransferSession> {
        let session = self.sessions.get(transfer_id)?;
        if session.role != role || session.state != state {
            tracing::debug!(
                "Dropping {} for {}: {} session is {}, expected {} in {}",
                event,
                transfer_id,
                session.role,
                session.state,
                role,
                state
            );
            return None;
        }
        Some(session)
    }

    fn transition(&self, transfer_id: &TransferId, new_state: TransferState) -> bool {
        match self.sessions.transition(transfer_id, new_state) {
            Ok(Some(previous)) => {
                tracing::debug!("Transfer {}: {} -> {}", transfer_id, previous, new_state);
                true
            }
            Ok(None) => false,
            Err(err) => {
                tracing::warn!("Transfer {}: {}", transfer_id, err);
                false
            }
        }
    }

    /// Move to a terminal state and schedule the session's removal
    fn finish(&mut self, transfer_id: &TransferId, state: TransferState) {
        if self.transition(transfer_id, state) {
            self.start_timer(transfer_id, TimerKind::Cleanup);
        }
    }

    /// Abort a transfer, telling the counterpart why
    fn abort(&mut self, session: &TransferSession, reason: &str) {
        tracing::warn!("Transfer {} failed: {}", session.transfer_id, reason);
        self.send(
            &session.counterpart_id,
            &session.transfer_id,
            Message::TransferError(TransferError {
                reason: reason.to_string(),
            }),
        );
        self.finish(&session.transfer_id, TransferState::Failed);
    }

    #[instrument(skip_all)]
    fn initiate(
        &mut self,
        transfer_id: TransferId,
        token: TokenRef,
        counterpart_id: PeerId,
        counterpart_name: String,
    ) {
        match self.peers.display_name(&counterpart_id) {
            Some(seen_as) => {
                tracing::debug!("Counterpart {} was discovered as `{}`", counterpart_id, seen_as)
            }
            None => tracing::debug!("Offering to {} which discovery has not seen", counterpart_id),
        }

        let request = PermissionRequest {
            sender_name: self.local_name.clone(),
            token_type: token.token_type.clone(),
            token_name: token.name.clone(),
            token_preview: token.preview(),
        };

        let session = TransferSession::sender(
            transfer_id.clone(),
            counterpart_id.clone(),
            token,
            TransferState::RequestingPermission,
        );
        if !self.sessions.insert(session) {
            tracing::error!("Transfer id {} already in use", transfer_id);
            return;
        }

        tracing::info!(
            "Requesting permission from {} ({}) for transfer {}",
            counterpart_name,
            counterpart_id,
            transfer_id
        );
        self.send(
            &counterpart_id,
            &transfer_id,
            Message::PermissionRequest(request),
        );
        self.start_timer(&transfer_id, TimerKind::Approval);
    }

    #[instrument(skip_all)]
    fn initiate_direct(
        &mut self,
        transfer_id: TransferId,
        token: TokenRef,
        counterpart_id: PeerId,
    ) {
        let request = TransferRequest {
            token_type: token.token_type.clone(),
            token_id: token.id.clone(),
        };

        let session = TransferSession::sender(
            transfer_id.clone(),
            counterpart_id.clone(),
            token,
            TransferState::WaitingForAddress,
        );
        if !self.sessions.insert(session) {
            tracing::error!("Transfer id {} already in use", transfer_id);
            return;
        }

        tracing::info!("Starting direct transfer {} to {}", transfer_id, counterpart_id);
        self.send(
            &counterpart_id,
            &transfer_id,
            Message::TransferRequest(request),
        );
        self.start_timer(&transfer_id, TimerKind::Transfer);
    }

    #[instrument(skip_all)]
    fn approve(&mut self, transfer_id: TransferId) {
        let Some(request) = self.approvals.remove(&transfer_id) else {
            tracing::debug!("No pending request to approve for {}", transfer_id);
            return;
        };

        let session = TransferSession::recipient(
            transfer_id.clone(),
            request.sender_peer_id.clone(),
            "",
            TransferState::Approved,
        );
        if !self.sessions.insert(session) {
            tracing::warn!("Transfer {} is already under way", transfer_id);
            return;
        }

        tracing::info!(
            "Approved {} from {} ({})",
            request.token_preview,
            request.sender_name,
            transfer_id
        );
        self.send(
            &request.sender_peer_id,
            &transfer_id,
            Message::PermissionResponse(PermissionResponse { approved: true }),
        );
        self.start_timer(&transfer_id, TimerKind::Transfer);
    }

    #[instrument(skip_all)]
    fn reject(&mut self, transfer_id: TransferId) {
        let Some(request) = self.approvals.remove(&transfer_id) else {
            tracing::debug!("No pending request to reject for {}", transfer_id);
            return;
        };

        tracing::info!("Rejected transfer {} from {}", transfer_id, request.sender_name);
        self.outbox
            .send_rejection(&request.sender_peer_id, &transfer_id);

        if let Some(session) = self.sessions.get(&transfer_id) {
            if handoff_common::state::check_state_transition(
                session.role,
                session.state,
                TransferState::Rejected,
            )
            .is_ok()
            {
                self.finish(&transfer_id, TransferState::Rejected);
            }
        }
    }

    #[instrument(skip_all)]
    fn incoming(&mut self, bytes: Vec<u8>, from: PeerId) {
        let decoded = match codec::decode(&bytes) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!("Dropping {} byte payload from {}: {}", bytes.len(), from, err);
                return;
            }
        };

        if let Some(session) = self.sessions.get(decoded.transfer_id()) {
            if session.counterpart_id != from {
                tracing::warn!(
                    "Dropping message for {} from {}, counterpart is {}",
                    session.transfer_id,
                    from,
                    session.counterpart_id
                );
                return;
            }
        }

        match decoded {
            Decoded::DetailRequest(transfer_id) => self.detail_request(transfer_id),
            Decoded::Envelope(Envelope {
                transfer_id,
                message,
            }) => {
                tracing::debug!("Received {} for {} from {}", message.kind(), transfer_id, from);
                self.dispatch(transfer_id, message, from)
            }
        }
    }

    fn dispatch(&mut self, transfer_id: TransferId, message: Message, from: PeerId) {
        match message {
            Message::PermissionRequest(request) => {
                self.permission_requested(transfer_id, request, from)
            }
            Message::PermissionResponse(PermissionResponse { approved }) => {
                self.permission_answered(transfer_id, approved)
            }
            Message::TransferRequest(request) => {
                self.transfer_requested(transfer_id, request, from)
            }
            Message::AddressResponse(AddressResponse { address }) => {
                self.address_received(transfer_id, address)
            }
            Message::TransferPackage(TransferPackage { package }) => {
                self.package_received(transfer_id, package)
            }
            Message::TransferComplete(complete) => self.completed(transfer_id, complete),
            Message::TransferError(TransferError { reason }) => {
                let Some(session) = self.sessions.get(&transfer_id) else {
                    return;
                };
                if session.state.is_terminal() {
                    return;
                }
                tracing::warn!("Counterpart aborted transfer {}: {}", transfer_id, reason);
                self.finish(&transfer_id, TransferState::Failed);
            }
        }
    }

    fn permission_requested(
        &mut self,
        transfer_id: TransferId,
        request: PermissionRequest,
        from: PeerId,
    ) {
        if self.sessions.contains(&transfer_id) {
            tracing::debug!("Ignoring permission request for known transfer {}", transfer_id);
            return;
        }

        let added = self.approvals.add(ApprovalRequest {
            transfer_id: transfer_id.clone(),
            sender_peer_id: from,
            sender_name: request.sender_name,
            token_type: request.token_type,
            token_name: request.token_name,
            token_preview: request.token_preview,
            received_at: unix_time(),
        });

        if added {
            tracing::info!("Permission requested for transfer {}", transfer_id);
        }
    }

    fn permission_answered(&mut self, transfer_id: TransferId, approved: bool) {
        let Some(session) = self.expect(
            &transfer_id,
            Role::Sender,
            TransferState::RequestingPermission,
            "permission response",
        ) else {
            return;
        };

        if !approved {
            tracing::info!("Transfer {} rejected by {}", transfer_id, session.counterpart_id);
            self.finish(&transfer_id, TransferState::Rejected);
            return;
        }

        let Some(token) = session.token else {
            self.abort(&session, "Sender session has no token");
            return;
        };

        if self.transition(&transfer_id, TransferState::WaitingForAddress) {
            self.send(
                &session.counterpart_id,
                &transfer_id,
                Message::TransferRequest(TransferRequest {
                    token_type: token.token_type,
                    token_id: token.id,
                }),
            );
            self.start_timer(&transfer_id, TimerKind::Transfer);
        }
    }

    fn detail_request(&mut self, transfer_id: TransferId) {
        let Some(session) = self.expect(
            &transfer_id,
            Role::Sender,
            TransferState::RequestingPermission,
            "detail request",
        ) else {
            return;
        };

        let Some(token) = session.token else {
            return;
        };

        tracing::debug!("Re-sending permission request for {}", transfer_id);
        self.send(
            &session.counterpart_id,
            &transfer_id,
            Message::PermissionRequest(PermissionRequest {
                sender_name: self.local_name.clone(),
                token_type: token.token_type.clone(),
                token_name: token.name.clone(),
                token_preview: token.preview(),
            }),
        );
    }

    fn transfer_requested(
        &mut self,
        transfer_id: TransferId,
        request: TransferRequest,
        from: PeerId,
    ) {
        match self.sessions.get(&transfer_id) {
            None => {
                // permission was granted out of band
                self.approvals.remove(&transfer_id);
                let session = TransferSession::recipient(
                    transfer_id.clone(),
                    from,
                    request.token_id.clone(),
                    TransferState::GeneratingAddress,
                );
                self.sessions.insert(session);
                self.start_timer(&transfer_id, TimerKind::Transfer);
                tracing::info!("Accepted direct transfer {}", transfer_id);
            }
            Some(session)
                if session.role == Role::Recipient && session.state == TransferState::Approved =>
            {
                self.sessions.update(&transfer_id, |session| {
                    session.token_id = request.token_id.clone();
                });
                if !self.transition(&transfer_id, TransferState::GeneratingAddress) {
                    return;
                }
            }
            Some(session) => {
                tracing::debug!(
                    "Dropping transfer request for {}: {} session is {}",
                    transfer_id,
                    session.role,
                    session.state
                );
                return;
            }
        }

        let ledger = self.ledger.clone();
        let tx = self.tx.clone();
        spawn_until_cancelled(&self.cancel, async move {
            let result = ledger
                .mint_receiving_address(&request.token_type, &request.token_id)
                .await;
            let _ = tx.send(Job::new(Command::AddressMinted {
                transfer_id,
                result,
            }));
        });
    }

    fn address_minted(&mut self, transfer_id: TransferId, result: Result<String, ledger::Error>) {
        let Some(session) = self.expect(
            &transfer_id,
            Role::Recipient,
            TransferState::GeneratingAddress,
            "minted address",
        ) else {
            return;
        };

        match result {
            Ok(address) => {
                if self.transition(&transfer_id, TransferState::WaitingForPackage) {
                    self.send(
                        &session.counterpart_id,
                        &transfer_id,
                        Message::AddressResponse(AddressResponse { address }),
                    );
                }
            }
            Err(err) => {
                self.abort(&session, &format!("Could not generate address: {err}"));
            }
        }
    }

    fn address_received(&mut self, transfer_id: TransferId, address: String) {
        let Some(session) = self.expect(
            &transfer_id,
            Role::Sender,
            TransferState::WaitingForAddress,
            "address response",
        ) else {
            return;
        };

        let Some(token) = session.token else {
            self.abort(&session, "Sender session has no token");
            return;
        };

        if !self.transition(&transfer_id, TransferState::CreatingPackage) {
            return;
        }

        let ledger = self.ledger.clone();
        let wallet = self.wallet.clone();
        let tx = self.tx.clone();
        spawn_until_cancelled(&self.cancel, async move {
            let result = match wallet.secret().await {
                Ok(secret) => {
                    ledger
                        .build_transfer_package(&token, &address, &secret)
                        .await
                }
                Err(err) => Err(err),
            };
            let _ = tx.send(Job::new(Command::PackageBuilt {
                transfer_id,
                result,
            }));
        });
    }

    fn package_built(&mut self, transfer_id: TransferId, result: Result<String, ledger::Error>) {
        let Some(session) = self.expect(
            &transfer_id,
            Role::Sender,
            TransferState::CreatingPackage,
            "built package",
        ) else {
            return;
        };

        match result {
            Ok(package) => {
                if self.transition(&transfer_id, TransferState::SendingPackage) {
                    self.send(
                        &session.counterpart_id,
                        &transfer_id,
                        Message::TransferPackage(TransferPackage { package }),
                    );
                }
            }
            Err(err) => {
                self.abort(&session, &format!("Could not create transfer package: {err}"));
            }
        }
    }

    fn package_received(&mut self, transfer_id: TransferId, package: String) {
        if self
            .expect(
                &transfer_id,
                Role::Recipient,
                TransferState::WaitingForPackage,
                "transfer package",
            )
            .is_none()
        {
            return;
        }

        self.sessions.update(&transfer_id, |session| {
            session.pending_package = Some(package.clone());
        });
        if !self.transition(&transfer_id, TransferState::CompletingTransfer) {
            return;
        }

        let ledger = self.ledger.clone();
        let wallet = self.wallet.clone();
        let tx = self.tx.clone();
        spawn_until_cancelled(&self.cancel, async move {
            let result = match wallet.secret().await {
                Ok(secret) => ledger.finalize_transfer_package(&package, &secret).await,
                Err(err) => Err(err),
            };
            let _ = tx.send(Job::new(Command::PackageFinalized {
                transfer_id,
                result,
            }));
        });
    }

    fn package_finalized(
        &mut self,
        transfer_id: TransferId,
        result: Result<TokenRef, ledger::Error>,
    ) {
        let Some(session) = self.expect(
            &transfer_id,
            Role::Recipient,
            TransferState::CompletingTransfer,
            "finalized package",
        ) else {
            return;
        };

        match result {
            Ok(token) => {
                let token_json = serde_json::to_string(&token)
                    .inspect_err(|err| {
                        tracing::warn!("Could not serialize received token: {}", err)
                    })
                    .ok();

                self.send(
                    &session.counterpart_id,
                    &transfer_id,
                    Message::TransferComplete(TransferComplete {
                        success: true,
                        token_json,
                    }),
                );
                self.finish(&transfer_id, TransferState::Completed);
                tracing::info!("Received token {} in transfer {}", token.id, transfer_id);

                let wallet = self.wallet.clone();
                tokio::spawn(async move { wallet.token_received(token).await });
            }
            Err(err) => {
                tracing::warn!("Could not finalize transfer {}: {}", transfer_id, err);
                self.send(
                    &session.counterpart_id,
                    &transfer_id,
                    Message::TransferComplete(TransferComplete {
                        success: false,
                        token_json: None,
                    }),
                );
                self.finish(&transfer_id, TransferState::Failed);
            }
        }
    }

    fn completed(&mut self, transfer_id: TransferId, complete: TransferComplete) {
        let Some(session) = self.sessions.get(&transfer_id) else {
            return;
        };
        if session.role != Role::Sender || session.state.is_terminal() {
            return;
        }

        if !complete.success {
            tracing::warn!("Recipient could not finalize transfer {}", transfer_id);
            self.finish(&transfer_id, TransferState::Failed);
            return;
        }

        if session.state != TransferState::SendingPackage {
            tracing::debug!(
                "Dropping completion for {} in {}",
                transfer_id,
                session.state
            );
            return;
        }

        self.finish(&transfer_id, TransferState::Completed);
        tracing::info!("Transfer {} completed", transfer_id);

        let wallet = self.wallet.clone();
        let token_id = session.token_id;
        tokio::spawn(async move { wallet.token_sent(&token_id).await });
    }

    fn timer_fired(&mut self, transfer_id: TransferId, generation: u64) {
        let Some(kind) = self.timers.claim(&transfer_id, generation) else {
            match self.timers.kind(&transfer_id) {
                Some(current) => {
                    tracing::trace!("Stale timer for {}, {} timer running", transfer_id, current)
                }
                None => tracing::trace!("Stale timer for {}", transfer_id),
            }
            return;
        };

        match kind {
            TimerKind::Cleanup => {
                if self.sessions.remove(&transfer_id).is_some() {
                    tracing::debug!("Removed finished transfer {}", transfer_id);
                }
            }
            TimerKind::Approval => {
                if let Some(session) = self.expect(
                    &transfer_id,
                    Role::Sender,
                    TransferState::RequestingPermission,
                    "approval timeout",
                ) {
                    self.abort(&session, "Approval timeout");
                }
            }
            TimerKind::Transfer => {
                if let Some(session) = self.sessions.get(&transfer_id) {
                    if !session.state.is_terminal() {
                        self.abort(&session, "Transfer timeout");
                    }
                }
            }
        }
    }
}
