//! Per transfer timer slots
//!
//! Each transfer owns at most one timer. Starting a timer for an id aborts the
//! one already running, and every timer carries a generation so a firing that
//! raced with its replacement can be recognised and ignored.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use handoff_common::TransferId;
use tokio::task::JoinHandle;

/// Timer purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Waiting for the permission response
    Approval,
    /// Waiting for the whole transfer
    Transfer,
    /// Removing a finished session
    Cleanup,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::Approval => write!(f, "approval"),
            TimerKind::Transfer => write!(f, "transfer"),
            TimerKind::Cleanup => write!(f, "cleanup"),
        }
    }
}

#[derive(Debug)]
struct Slot {
    kind: TimerKind,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Timer slots keyed by transfer id
#[derive(Debug, Default)]
pub struct Timers {
    slots: HashMap<TransferId, Slot>,
    next_generation: u64,
}

impl Timers {
    /// Create an empty set of slots
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a `kind` timer for `transfer_id`, replacing any running one
    ///
    /// `on_fire` runs once `delay` elapsed, with the timer's generation.
    pub fn start<F>(
        &mut self,
        transfer_id: TransferId,
        kind: TimerKind,
        delay: Duration,
        on_fire: F,
    )
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.next_generation += 1;
        let generation = self.next_generation;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation);
        });

        if let Some(previous) = self.slots.insert(
            transfer_id.clone(),
            Slot {
                kind,
                generation,
                handle,
            },
        ) {
            tracing::trace!(
                "Replacing {} timer of {} with {}",
                previous.kind,
                transfer_id,
                kind
            );
            previous.handle.abort();
        }
    }

    /// Claim a fired timer
    ///
    /// Returns its kind if `generation` is still the current timer of
    /// `transfer_id`, freeing the slot. Stale firings return `None`.
    pub fn claim(&mut self, transfer_id: &TransferId, generation: u64) -> Option<TimerKind> {
        match self.slots.get(transfer_id) {
            Some(slot) if slot.generation == generation => {
                self.slots.remove(transfer_id).map(|slot| slot.kind)
            }
            _ => None,
        }
    }

    /// Kind of the running timer of `transfer_id`
    pub fn kind(&self, transfer_id: &TransferId) -> Option<TimerKind> {
        self.slots.get(transfer_id).map(|slot| slot.kind)
    }

    /// Cancel every timer
    pub fn cancel_all(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.handle.abort();
        }
    }

    /// Number of running timers
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no timer is running
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
