//! Mesh transport abstraction

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::PeerId;

/// What the underlying link can reliably carry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportCapabilities {
    /// Largest payload delivered reliably in a single message, if bounded
    pub max_message_size: Option<usize>,
}

impl TransportCapabilities {
    /// Whether a payload of `len` bytes fits in a single message
    pub fn fits(&self, len: usize) -> bool {
        self.max_message_size.map_or(true, |max| len <= max)
    }
}

/// Event produced by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Payload received from a peer
    MessageReceived {
        /// Sending peer
        from: PeerId,
        /// Raw payload
        bytes: Vec<u8>,
    },
    /// Peer became visible
    PeerDiscovered {
        /// Peer address
        peer_id: PeerId,
        /// Advertised name
        display_name: String,
    },
}

/// Lossy point to point link
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `bytes` to `peer_id`
    ///
    /// Returns whether the link accepted the payload. Delivery is not
    /// guaranteed either way.
    async fn send(&self, peer_id: &PeerId, bytes: &[u8]) -> bool;

    /// Link capabilities
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits() {
        assert!(TransportCapabilities::default().fits(10_000));

        let caps = TransportCapabilities {
            max_message_size: Some(512),
        };
        assert!(caps.fits(512));
        assert!(!caps.fits(513));
    }
}
