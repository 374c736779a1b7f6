//! Outbound delivery
//!
//! Every frame is handed to the transport on its own task so a slow or dead
//! link never stalls the worker. Failures are logged, the protocol timers take
//! care of the rest.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use handoff_common::codec::{CompactFrame, PermissionResponse};
use handoff_common::{Envelope, Message, PeerId, RetryPolicy, TransferId, Transport};
use tokio_util::sync::CancellationToken;

use crate::config::CoordinatorConfig;

/// Spawn `future`, dropping it as soon as `cancel` fires
pub(super) fn spawn_until_cancelled<F>(cancel: &CancellationToken, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = future => {}
        }
    });
}

#[derive(Clone)]
pub(super) struct Outbox {
    transport: Arc<dyn Transport>,
    config: Arc<CoordinatorConfig>,
    cancel: CancellationToken,
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox")
            .field("capabilities", &self.transport.capabilities())
            .finish()
    }
}

impl Outbox {
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        config: Arc<CoordinatorConfig>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            config,
            cancel,
        }
    }

    /// Encode `envelope` for the link
    ///
    /// Frames above the link's size limit are swapped for their compact form
    /// when they have one.
    fn frame(&self, envelope: &Envelope) -> Option<Vec<u8>> {
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(
                    "Could not encode {} for {}: {}",
                    envelope.kind(),
                    envelope.transfer_id,
                    err
                );
                return None;
            }
        };

        let capabilities = self.transport.capabilities();
        if capabilities.fits(bytes.len()) {
            return Some(bytes);
        }

        match envelope.compact() {
            Some(frame) => {
                tracing::debug!(
                    "{} for {} is {} bytes, sending compact `{}` instead",
                    envelope.kind(),
                    envelope.transfer_id,
                    bytes.len(),
                    frame
                );
                Some(frame.encode())
            }
            None => {
                tracing::warn!(
                    "{} for {} is {} bytes, above the link limit of {} bytes",
                    envelope.kind(),
                    envelope.transfer_id,
                    bytes.len(),
                    capabilities.max_message_size.unwrap_or_default()
                );
                Some(bytes)
            }
        }
    }

    async fn deliver(&self, peer_id: &PeerId, bytes: &[u8], policy: &RetryPolicy) -> bool {
        policy
            .run(|_| self.transport.send(peer_id, bytes))
            .await
    }

    /// Send `envelope` to `peer_id` in the background
    pub(super) fn send(&self, peer_id: &PeerId, envelope: Envelope) {
        let Some(bytes) = self.frame(&envelope) else {
            return;
        };

        let outbox = self.clone();
        let peer_id = peer_id.clone();
        spawn_until_cancelled(&self.cancel, async move {
            let policy = outbox.config.send_retry;
            if outbox.deliver(&peer_id, &bytes, &policy).await {
                tracing::trace!(
                    "Sent {} for {} to {}",
                    envelope.kind(),
                    envelope.transfer_id,
                    peer_id
                );
            } else {
                tracing::warn!(
                    "Giving up on {} for {} to {} after {} attempts",
                    envelope.kind(),
                    envelope.transfer_id,
                    peer_id,
                    policy.max_attempts
                );
            }
        });
    }

    /// Deliver a rejection, trying hard to get it through
    ///
    /// The compact frame goes first since it is the most likely to survive a
    /// constrained link, followed by the structured response. If neither was
    /// accepted the compact frame is tried once more after a pause.
    pub(super) fn send_rejection(&self, peer_id: &PeerId, transfer_id: &TransferId) {
        let compact = CompactFrame::Reject(transfer_id.clone()).encode();
        let structured = self.frame(&Envelope::new(
            transfer_id.clone(),
            Message::PermissionResponse(PermissionResponse { approved: false }),
        ));

        let outbox = self.clone();
        let peer_id = peer_id.clone();
        let transfer_id = transfer_id.clone();
        spawn_until_cancelled(&self.cancel, async move {
            let config = outbox.config.clone();

            let compact_sent = outbox
                .deliver(&peer_id, &compact, &config.reject_retry)
                .await;
            if compact_sent {
                tracing::debug!("Compact rejection of {} accepted by the link", transfer_id);
            }

            tokio::time::sleep(config.reject_followup_delay()).await;

            let structured_sent = match structured {
                Some(bytes) => outbox.deliver(&peer_id, &bytes, &config.send_retry).await,
                None => false,
            };

            if compact_sent || structured_sent {
                return;
            }

            tracing::warn!(
                "Rejection of {} not accepted in either encoding, retrying compact form",
                transfer_id
            );
            tokio::time::sleep(config.reject_fallback_delay()).await;

            if !outbox
                .deliver(&peer_id, &compact, &config.reject_fallback_retry)
                .await
            {
                tracing::error!("Could not deliver rejection of {} to {}", transfer_id, peer_id);
            }
        });
    }
}
