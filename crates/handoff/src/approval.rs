//! Pending approval requests
//!
//! Incoming permission requests wait here until the user approves or rejects
//! them. Every change is published through a [`watch`] channel so a UI can
//! render the list without polling.

use handoff_common::{ApprovalRequest, TransferId};
use tokio::sync::watch;

/// Ordered queue of permission requests, keyed by transfer id
#[derive(Debug)]
pub struct ApprovalQueue {
    pending: watch::Sender<Vec<ApprovalRequest>>,
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (pending, _) = watch::channel(Vec::new());
        Self { pending }
    }

    /// Enqueue `request`
    ///
    /// Returns `false` if a request with the same transfer id is already
    /// pending, in which case nothing changes.
    pub fn add(&self, request: ApprovalRequest) -> bool {
        self.pending.send_if_modified(|pending| {
            if pending.iter().any(|r| r.transfer_id == request.transfer_id) {
                return false;
            }
            pending.push(request);
            true
        })
    }

    /// Remove and return the request for `transfer_id`
    pub fn remove(&self, transfer_id: &TransferId) -> Option<ApprovalRequest> {
        let mut removed = None;
        self.pending.send_if_modified(|pending| {
            match pending.iter().position(|r| &r.transfer_id == transfer_id) {
                Some(index) => {
                    removed = Some(pending.remove(index));
                    true
                }
                None => false,
            }
        });
        removed
    }

    /// Drop every pending request
    pub fn clear(&self) {
        self.pending.send_if_modified(|pending| {
            let changed = !pending.is_empty();
            pending.clear();
            changed
        });
    }

    /// Subscribe to changes
    pub fn subscribe(&self) -> watch::Receiver<Vec<ApprovalRequest>> {
        self.pending.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use handoff_common::PeerId;

    use super::*;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            transfer_id: TransferId::from_str(id).unwrap(),
            sender_peer_id: PeerId::from("AA:BB"),
            sender_name: "Alice".to_string(),
            token_type: "Unicity Token".to_string(),
            token_name: "Gold".to_string(),
            token_preview: "Unicity Token: Gold".to_string(),
            received_at: 0,
        }
    }

    #[test]
    fn test_add_is_idempotent() {
        let queue = ApprovalQueue::new();
        assert!(queue.add(request("t1")));
        assert!(!queue.add(request("t1")));
        assert!(queue.add(request("t2")));

        let ids: Vec<_> = queue
            .subscribe()
            .borrow()
            .iter()
            .map(|r| r.transfer_id.to_string())
            .collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[test]
    fn test_remove_and_clear() {
        let queue = ApprovalQueue::new();
        queue.add(request("t1"));
        queue.add(request("t2"));

        let id = TransferId::from_str("t1").unwrap();
        assert_eq!(
            queue.remove(&id).map(|r| r.sender_name),
            Some("Alice".to_string())
        );
        assert!(queue.remove(&id).is_none());
        assert_eq!(queue.subscribe().borrow().len(), 1);

        queue.clear();
        assert!(queue.subscribe().borrow().is_empty());
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let queue = ApprovalQueue::new();
        let mut rx = queue.subscribe();

        queue.add(request("t1"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        // duplicate does not wake subscribers
        queue.add(request("t1"));
        assert!(!rx.has_changed().unwrap());

        queue.remove(&TransferId::from_str("t1").unwrap());
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_empty());
    }
}
