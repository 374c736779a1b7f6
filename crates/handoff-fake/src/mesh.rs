//! In-process mesh
//!
//! Every endpoint joining a [`MeshHub`] gets an inbound event stream. Joining
//! announces the newcomer to everyone already present and vice versa, the way
//! a discovery scan would.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use handoff_common::{PeerId, Transport, TransportCapabilities, TransportEvent};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const INBOX_SIZE: usize = 256;

/// Fault injection for one endpoint's outgoing link
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkFaults {
    /// Frames larger than this are refused, and the limit is advertised
    pub max_message_size: Option<usize>,
    /// Probability that an accepted frame is silently lost
    pub drop_rate: f64,
    /// Refuse every frame
    pub down: bool,
}

#[derive(Debug)]
struct Member {
    display_name: String,
    inbox: mpsc::Sender<TransportEvent>,
}

/// Shared in-memory medium
#[derive(Debug, Clone, Default)]
pub struct MeshHub {
    members: Arc<RwLock<HashMap<PeerId, Member>>>,
}

impl MeshHub {
    /// Create an empty mesh
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the mesh as `peer_id`
    ///
    /// Returns the endpoint to send with and the stream of inbound events.
    pub fn join(
        &self,
        peer_id: impl Into<PeerId>,
        display_name: impl Into<String>,
    ) -> (Arc<MeshEndpoint>, ReceiverStream<TransportEvent>) {
        let peer_id = peer_id.into();
        let display_name = display_name.into();
        let (tx, rx) = mpsc::channel(INBOX_SIZE);

        let mut members = self.members.write();
        for (other_id, other) in members.iter() {
            let _ = other.inbox.try_send(TransportEvent::PeerDiscovered {
                peer_id: peer_id.clone(),
                display_name: display_name.clone(),
            });
            let _ = tx.try_send(TransportEvent::PeerDiscovered {
                peer_id: other_id.clone(),
                display_name: other.display_name.clone(),
            });
        }
        members.insert(
            peer_id.clone(),
            Member {
                display_name,
                inbox: tx,
            },
        );
        drop(members);

        let endpoint = MeshEndpoint {
            peer_id,
            hub: self.clone(),
            faults: Mutex::new(LinkFaults::default()),
        };
        (Arc::new(endpoint), ReceiverStream::new(rx))
    }

    /// Remove `peer_id` from the mesh, ending its event stream
    pub fn leave(&self, peer_id: &PeerId) {
        self.members.write().remove(peer_id);
    }

    fn inbox(&self, peer_id: &PeerId) -> Option<mpsc::Sender<TransportEvent>> {
        self.members
            .read()
            .get(peer_id)
            .map(|member| member.inbox.clone())
    }
}

/// One device on a [`MeshHub`]
#[derive(Debug)]
pub struct MeshEndpoint {
    peer_id: PeerId,
    hub: MeshHub,
    faults: Mutex<LinkFaults>,
}

impl MeshEndpoint {
    /// Own address
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Replace the fault settings of the outgoing link
    pub fn set_faults(&self, faults: LinkFaults) {
        *self.faults.lock() = faults;
    }

    /// Take the outgoing link down or bring it back
    pub fn set_down(&self, down: bool) {
        self.faults.lock().down = down;
    }
}

#[async_trait]
impl Transport for MeshEndpoint {
    async fn send(&self, peer_id: &PeerId, bytes: &[u8]) -> bool {
        let faults = *self.faults.lock();

        if faults.down {
            tracing::trace!("Link of {} is down", self.peer_id);
            return false;
        }

        if let Some(max) = faults.max_message_size {
            if bytes.len() > max {
                tracing::debug!(
                    "Refusing {} byte frame from {} (limit {})",
                    bytes.len(),
                    self.peer_id,
                    max
                );
                return false;
            }
        }

        let Some(inbox) = self.hub.inbox(peer_id) else {
            tracing::debug!("{} is not on the mesh", peer_id);
            return false;
        };

        if faults.drop_rate > 0.0 && rand::random::<f64>() < faults.drop_rate {
            tracing::trace!("Frame from {} to {} lost", self.peer_id, peer_id);
            return true;
        }

        inbox
            .send(TransportEvent::MessageReceived {
                from: self.peer_id.clone(),
                bytes: bytes.to_vec(),
            })
            .await
            .is_ok()
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            max_message_size: self.faults.lock().max_message_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn test_join_announces_peers() {
        let hub = MeshHub::new();
        let (_alice, mut alice_events) = hub.join("alice", "Alice");
        let (_bob, mut bob_events) = hub.join("bob", "Bob");

        assert_eq!(
            alice_events.next().await,
            Some(TransportEvent::PeerDiscovered {
                peer_id: PeerId::from("bob"),
                display_name: "Bob".to_string(),
            })
        );
        assert_eq!(
            bob_events.next().await,
            Some(TransportEvent::PeerDiscovered {
                peer_id: PeerId::from("alice"),
                display_name: "Alice".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_delivery_and_faults() {
        let hub = MeshHub::new();
        let (alice, _alice_events) = hub.join("alice", "Alice");
        let (_bob, mut bob_events) = hub.join("bob", "Bob");
        let bob = PeerId::from("bob");

        assert!(alice.send(&bob, b"hello").await);
        assert!(!alice.send(&PeerId::from("carol"), b"hello").await);

        alice.set_faults(LinkFaults {
            max_message_size: Some(4),
            ..Default::default()
        });
        assert_eq!(alice.capabilities().max_message_size, Some(4));
        assert!(!alice.send(&bob, b"hello").await);

        alice.set_down(true);
        assert!(!alice.send(&bob, b"hi").await);

        // discovery of alice, then the single delivered frame
        let mut received = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), bob_events.next()).await
        {
            received.push(event);
        }
        assert_eq!(received.len(), 2);
        assert_eq!(
            received[1],
            TransportEvent::MessageReceived {
                from: PeerId::from("alice"),
                bytes: b"hello".to_vec(),
            }
        );
    }
}
