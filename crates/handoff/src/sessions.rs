//! Session table
//!
//! The coordinator worker is the only writer. Handles read through a
//! [`SessionView`], and every state change is mirrored into a watch channel
//! of `{transfer_id: state}`.

use std::collections::HashMap;
use std::sync::Arc;

use handoff_common::state::{self, check_state_transition};
use handoff_common::{TransferId, TransferSession, TransferState};
use parking_lot::RwLock;
use tokio::sync::watch;

type Sessions = Arc<RwLock<HashMap<TransferId, TransferSession>>>;

/// Map of transfer states, published on every change
pub type StateMap = HashMap<TransferId, TransferState>;

/// Writable session table
#[derive(Debug)]
pub struct SessionTable {
    sessions: Sessions,
    states: watch::Sender<StateMap>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    /// Create an empty table
    pub fn new() -> Self {
        let (states, _) = watch::channel(HashMap::new());
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            states,
        }
    }

    /// Read only view for handles
    pub fn view(&self) -> SessionView {
        SessionView {
            sessions: self.sessions.clone(),
            states: self.states.subscribe(),
        }
    }

    /// Insert a new session
    ///
    /// Returns `false` and leaves the table untouched if the id is taken.
    pub fn insert(&self, session: TransferSession) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.transfer_id) {
            return false;
        }

        let (id, state) = (session.transfer_id.clone(), session.state);
        sessions.insert(id.clone(), session);
        drop(sessions);

        self.states.send_modify(|states| {
            states.insert(id, state);
        });
        true
    }

    /// Snapshot of a session
    pub fn get(&self, transfer_id: &TransferId) -> Option<TransferSession> {
        self.sessions.read().get(transfer_id).cloned()
    }

    /// Whether a session exists for `transfer_id`
    pub fn contains(&self, transfer_id: &TransferId) -> bool {
        self.sessions.read().contains_key(transfer_id)
    }

    /// Mutate a session without touching its state
    pub fn update<F>(&self, transfer_id: &TransferId, f: F) -> bool
    where
        F: FnOnce(&mut TransferSession),
    {
        match self.sessions.write().get_mut(transfer_id) {
            Some(session) => {
                f(session);
                true
            }
            None => false,
        }
    }

    /// Move a session to `new_state`
    ///
    /// Returns `Ok(None)` if there is no such session.
    pub fn transition(
        &self,
        transfer_id: &TransferId,
        new_state: TransferState,
    ) -> Result<Option<TransferState>, state::Error> {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(transfer_id) else {
            return Ok(None);
        };

        check_state_transition(session.role, session.state, new_state)?;
        let previous = session.state;
        session.state = new_state;
        drop(sessions);

        self.states.send_modify(|states| {
            states.insert(transfer_id.clone(), new_state);
        });
        Ok(Some(previous))
    }

    /// Remove a session
    pub fn remove(&self, transfer_id: &TransferId) -> Option<TransferSession> {
        let removed = self.sessions.write().remove(transfer_id);
        if removed.is_some() {
            self.states.send_modify(|states| {
                states.remove(transfer_id);
            });
        }
        removed
    }

    /// Drop every session
    pub fn clear(&self) {
        self.sessions.write().clear();
        self.states.send_if_modified(|states| {
            let changed = !states.is_empty();
            states.clear();
            changed
        });
    }
}

/// Read only view of the session table
#[derive(Debug, Clone)]
pub struct SessionView {
    sessions: Sessions,
    states: watch::Receiver<StateMap>,
}

impl SessionView {
    /// Snapshot of a session
    pub fn get(&self, transfer_id: &TransferId) -> Option<TransferSession> {
        self.sessions.read().get(transfer_id).cloned()
    }

    /// Ids of all sessions not yet cleaned up
    pub fn ids(&self) -> Vec<TransferId> {
        let mut ids: Vec<_> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<StateMap> {
        self.states.clone()
    }
}
