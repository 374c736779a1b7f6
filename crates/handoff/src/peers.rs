//! Last seen directory of mesh peers
//!
//! Purely diagnostic. Sends are never gated on a peer being listed here since
//! discovery on a mesh link is itself unreliable.

use std::collections::HashMap;
use std::sync::Arc;

use handoff_common::util::unix_time;
use handoff_common::{PeerId, PeerRecord};
use parking_lot::RwLock;

#[derive(Debug, Default)]
struct Entries {
    records: HashMap<PeerId, (u64, PeerRecord)>,
    sequence: u64,
}

/// Shared peer directory
#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    entries: Arc<RwLock<Entries>>,
}

impl PeerDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `peer_id` was seen now
    pub fn upsert(&self, peer_id: PeerId, display_name: impl Into<String>) {
        let mut entries = self.entries.write();
        entries.sequence += 1;
        let sequence = entries.sequence;

        let record = PeerRecord {
            peer_id: peer_id.clone(),
            display_name: display_name.into(),
            last_seen: unix_time(),
        };
        entries.records.insert(peer_id, (sequence, record));
    }

    /// Display name of `peer_id`, if known
    pub fn display_name(&self, peer_id: &PeerId) -> Option<String> {
        self.entries
            .read()
            .records
            .get(peer_id)
            .map(|(_, record)| record.display_name.clone())
    }

    /// All known peers, most recently seen first
    pub fn list(&self) -> Vec<PeerRecord> {
        let entries = self.entries.read();
        let mut records: Vec<_> = entries.records.values().cloned().collect();
        records.sort_by(|(seq_a, a), (seq_b, b)| {
            b.last_seen.cmp(&a.last_seen).then(seq_b.cmp(seq_a))
        });
        records.into_iter().map(|(_, record)| record).collect()
    }

    /// Forget every peer
    pub fn clear(&self) {
        self.entries.write().records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_recent_first() {
        let peers = PeerDirectory::new();
        peers.upsert(PeerId::from("a"), "Alice");
        peers.upsert(PeerId::from("b"), "Bob");
        peers.upsert(PeerId::from("c"), "Carol");
        // seen again
        peers.upsert(PeerId::from("a"), "Alice's phone");

        let names: Vec<_> = peers.list().into_iter().map(|p| p.display_name).collect();
        assert_eq!(names, vec!["Alice's phone", "Carol", "Bob"]);
    }

    #[test]
    fn test_display_name() {
        let peers = PeerDirectory::new();
        assert!(peers.display_name(&PeerId::from("a")).is_none());
        peers.upsert(PeerId::from("a"), "Alice");
        assert_eq!(peers.display_name(&PeerId::from("a")).as_deref(), Some("Alice"));

        peers.clear();
        assert!(peers.list().is_empty());
    }
}
