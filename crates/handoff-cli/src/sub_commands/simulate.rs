use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};
use handoff::common::{Ledger, PeerId, TokenRef, Transport, TransferState, Wallet};
use handoff::{CoordinatorBuilder, TransferCoordinator};
use handoff_fake::{FakeLedger, FakeWallet, LedgerFaults, LinkFaults, MeshHub};
use tokio::task::JoinHandle;

use crate::config::Settings;

const SENDER_ID: &str = "sender";
const RECIPIENT_ID: &str = "recipient";

/// Ledger step forced to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailStep {
    /// Recipient cannot mint an address
    Mint,
    /// Sender cannot build the package
    Build,
    /// Recipient cannot finalize the package
    Finalize,
}

#[derive(Args)]
pub struct SimulateSubCommand {
    /// Token name
    #[arg(long, default_value = "Gold Coin")]
    token_name: String,
    /// Token type
    #[arg(long, default_value = "Unicity Token")]
    token_type: String,
    /// Recipient declines the offer
    #[arg(long)]
    reject: bool,
    /// Skip the permission exchange
    #[arg(long)]
    direct: bool,
    /// Largest frame the link carries
    #[arg(long)]
    max_message_size: Option<usize>,
    /// Probability that a frame is lost
    #[arg(long)]
    drop_rate: Option<f64>,
    /// Make one ledger step fail
    #[arg(long, value_enum)]
    fail: Option<FailStep>,
}

struct Device {
    coordinator: Arc<TransferCoordinator>,
    wallet: Arc<FakeWallet>,
}

fn join(
    hub: &MeshHub,
    settings: &Settings,
    peer_id: &str,
    name: &str,
    link: LinkFaults,
    ledger: FakeLedger,
) -> Result<Device> {
    let (endpoint, events) = hub.join(peer_id, name);
    endpoint.set_faults(link);

    ledger.set_delay(Duration::from_millis(settings.simulation.ledger_delay_ms));
    let ledger: Arc<dyn Ledger> = Arc::new(ledger);
    let wallet = Arc::new(FakeWallet::default());
    let transport: Arc<dyn Transport> = endpoint;

    let coordinator = CoordinatorBuilder::new()
        .config(settings.coordinator.clone())
        .local_name(name)
        .transport(transport)
        .ledger(ledger)
        .wallet(wallet.clone() as Arc<dyn Wallet>)
        .build()?;
    coordinator.listen(events);

    Ok(Device {
        coordinator: Arc::new(coordinator),
        wallet,
    })
}

/// Answer every permission request as `reject` dictates
fn answer_offers(recipient: Arc<TransferCoordinator>, reject: bool) -> JoinHandle<()> {
    let mut pending = recipient.subscribe_pending_approvals();

    tokio::spawn(async move {
        while pending.changed().await.is_ok() {
            let requests = pending.borrow_and_update().clone();
            for request in requests {
                println!(
                    "{} offers {} ({})",
                    request.sender_name, request.token_preview, request.transfer_id
                );

                let answered = if reject {
                    recipient.reject_transfer(&request.transfer_id).await
                } else {
                    recipient.approve_transfer(&request.transfer_id).await
                };

                if let Err(err) = answered {
                    tracing::error!("Could not answer {}: {}", request.transfer_id, err);
                    return;
                }
            }
        }
    })
}

pub async fn simulate(settings: &Settings, sub_command_args: &SimulateSubCommand) -> Result<()> {
    let link = LinkFaults {
        max_message_size: sub_command_args
            .max_message_size
            .or(settings.simulation.max_message_size),
        drop_rate: sub_command_args
            .drop_rate
            .unwrap_or(settings.simulation.drop_rate),
        down: false,
    };

    if !(0.0..=1.0).contains(&link.drop_rate) {
        bail!("Drop rate must be between 0 and 1");
    }

    let faults = LedgerFaults {
        fail_mint: sub_command_args.fail == Some(FailStep::Mint),
        fail_build: sub_command_args.fail == Some(FailStep::Build),
        fail_finalize: sub_command_args.fail == Some(FailStep::Finalize),
    };

    let hub = MeshHub::new();
    let sender = join(
        &hub,
        settings,
        SENDER_ID,
        &settings.device_name,
        link,
        FakeLedger::with_faults(faults),
    )?;
    let recipient = join(
        &hub,
        settings,
        RECIPIENT_ID,
        &settings.simulation.peer_name,
        link,
        FakeLedger::with_faults(faults),
    )?;

    let answering = answer_offers(recipient.coordinator.clone(), sub_command_args.reject);

    let token = TokenRef::new(
        "cli-token-1",
        &sub_command_args.token_type,
        &sub_command_args.token_name,
        "{}",
    );
    let recipient_id = PeerId::from(RECIPIENT_ID);

    let mut states = sender.coordinator.subscribe_transfer_states();
    let transfer_id = if sub_command_args.direct {
        sender
            .coordinator
            .initiate_direct_transfer(token, recipient_id)
            .await?
    } else {
        sender
            .coordinator
            .initiate_transfer(token, recipient_id, &settings.simulation.peer_name)
            .await?
    };
    println!("Transfer {}", transfer_id);

    let deadline = settings.coordinator.approval_timeout()
        + settings.coordinator.transfer_timeout()
        + Duration::from_secs(5);

    let progress = async {
        let mut last = None;
        loop {
            let state = states.borrow_and_update().get(&transfer_id).copied();
            if let Some(state) = state {
                if last != Some(state) {
                    println!("  {}", state);
                    last = Some(state);
                }
                if state.is_terminal() {
                    return Some(state);
                }
            }

            if states.changed().await.is_err() {
                return last;
            }
        }
    };

    let outcome = match tokio::time::timeout(deadline, progress).await {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!("No terminal state within {} ms", deadline.as_millis());
            None
        }
    };

    answering.abort();

    // give the recipient a moment to settle its side
    tokio::time::sleep(Duration::from_millis(200)).await;
    let received = recipient.wallet.log().received;
    let sent = sender.wallet.log().sent;

    sender.coordinator.shutdown().await;
    recipient.coordinator.shutdown().await;

    match outcome {
        Some(TransferState::Completed) => {
            println!(
                "Completed: sender released {}, recipient holds {}",
                sent.join(", "),
                received
                    .iter()
                    .map(TokenRef::preview)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            Ok(())
        }
        Some(state) => {
            println!("Transfer ended {}", state);
            Ok(())
        }
        None => bail!("Transfer {} did not finish", transfer_id),
    }
}
