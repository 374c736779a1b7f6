#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use handoff::common::{
    Envelope, Message, MessageKind, PeerId, TokenRef, TransferId, TransferState, Transport,
};
use handoff::{CoordinatorBuilder, CoordinatorConfig, TransferCoordinator};
use handoff_fake::{FakeLedger, FakeWallet, MeshEndpoint, MeshHub, RecordingTransport, SentFrame};

/// Upper bound for any wait, virtual when the clock is paused
pub const WAIT: Duration = Duration::from_secs(90);

pub fn gold_coin() -> TokenRef {
    TokenRef::new("t1", "Unicity Token", "Gold Coin", r#"{"id":"t1"}"#)
}

pub fn frame(transfer_id: &TransferId, message: Message) -> Vec<u8> {
    Envelope::new(transfer_id.clone(), message)
        .encode()
        .expect("valid envelope")
}

pub fn kinds(frames: &[SentFrame]) -> Vec<MessageKind> {
    frames
        .iter()
        .filter_map(|frame| match frame.decoded() {
            Some(handoff::common::Decoded::Envelope(envelope)) => Some(envelope.kind()),
            _ => None,
        })
        .collect()
}

pub fn envelopes(frames: &[SentFrame], kind: MessageKind) -> Vec<Envelope> {
    frames
        .iter()
        .filter_map(|frame| match frame.decoded() {
            Some(handoff::common::Decoded::Envelope(envelope)) if envelope.kind() == kind => {
                Some(envelope)
            }
            _ => None,
        })
        .collect()
}

fn build(
    name: &str,
    transport: Arc<dyn Transport>,
    ledger: Arc<FakeLedger>,
    wallet: Arc<FakeWallet>,
    config: CoordinatorConfig,
) -> TransferCoordinator {
    CoordinatorBuilder::new()
        .local_name(name)
        .config(config)
        .transport(transport)
        .ledger(ledger)
        .wallet(wallet)
        .build()
        .expect("all collaborators set")
}

/// Coordinator whose sends are recorded
pub struct Harness {
    pub coordinator: TransferCoordinator,
    pub transport: Arc<RecordingTransport>,
    pub ledger: Arc<FakeLedger>,
    pub wallet: Arc<FakeWallet>,
}

impl Harness {
    pub fn new(name: &str) -> Self {
        Self::with(
            name,
            RecordingTransport::new(),
            FakeLedger::new(),
            CoordinatorConfig::default(),
        )
    }

    pub fn with(
        name: &str,
        transport: RecordingTransport,
        ledger: FakeLedger,
        config: CoordinatorConfig,
    ) -> Self {
        let transport = Arc::new(transport);
        let ledger = Arc::new(ledger);
        let wallet = Arc::new(FakeWallet::default());
        let coordinator = build(
            name,
            transport.clone(),
            ledger.clone(),
            wallet.clone(),
            config,
        );

        Self {
            coordinator,
            transport,
            ledger,
            wallet,
        }
    }

    pub fn state(&self, transfer_id: &TransferId) -> Option<TransferState> {
        self.coordinator
            .get_session(transfer_id)
            .map(|session| session.state)
    }

    /// Wait until a frame of `kind` was sent, returning it
    pub async fn sent(&self, kind: MessageKind) -> Envelope {
        let frames = tokio::time::timeout(
            WAIT,
            self.transport
                .wait_for(|frames| kinds(frames).contains(&kind)),
        )
        .await
        .expect("frame sent in time");

        envelopes(&frames, kind)
            .pop()
            .expect("frame of the awaited kind")
    }

    /// Feed a message as if it came from `from`
    pub async fn receive(&self, from: &str, transfer_id: &TransferId, message: Message) {
        self.coordinator
            .handle_incoming_message(&frame(transfer_id, message), PeerId::from(from))
            .await
            .expect("coordinator running");
    }
}

/// Coordinator on a shared mesh
pub struct Node {
    pub peer_id: PeerId,
    pub coordinator: TransferCoordinator,
    pub endpoint: Arc<MeshEndpoint>,
    pub ledger: Arc<FakeLedger>,
    pub wallet: Arc<FakeWallet>,
}

impl Node {
    pub fn join(hub: &MeshHub, peer_id: &str, name: &str) -> Self {
        let (endpoint, events) = hub.join(peer_id, name);
        let ledger = Arc::new(FakeLedger::new());
        let wallet = Arc::new(FakeWallet::default());
        let coordinator = build(
            name,
            endpoint.clone(),
            ledger.clone(),
            wallet.clone(),
            CoordinatorConfig::default(),
        );
        coordinator.listen(events);

        Self {
            peer_id: PeerId::from(peer_id),
            coordinator,
            endpoint,
            ledger,
            wallet,
        }
    }
}

pub async fn wait_state(
    coordinator: &TransferCoordinator,
    transfer_id: &TransferId,
    state: TransferState,
) {
    let mut states = coordinator.subscribe_transfer_states();
    tokio::time::timeout(
        WAIT,
        states.wait_for(|states| states.get(transfer_id) == Some(&state)),
    )
    .await
    .unwrap_or_else(|_| panic!("{} never reached {}", transfer_id, state))
    .expect("coordinator running");
}

pub async fn wait_removed(coordinator: &TransferCoordinator, transfer_id: &TransferId) {
    let mut states = coordinator.subscribe_transfer_states();
    tokio::time::timeout(
        WAIT,
        states.wait_for(|states| !states.contains_key(transfer_id)),
    )
    .await
    .expect("session removed in time")
    .expect("coordinator running");
}

pub async fn wait_pending(coordinator: &TransferCoordinator) -> TransferId {
    let mut approvals = coordinator.subscribe_pending_approvals();
    let pending = tokio::time::timeout(WAIT, approvals.wait_for(|pending| !pending.is_empty()))
        .await
        .expect("permission request arrived")
        .expect("coordinator running")
        .clone();
    pending[0].transfer_id.clone()
}
