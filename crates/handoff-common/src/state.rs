//! State transition rules

use crate::types::{Role, TransferState};

/// State transition Error
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Session already reached a terminal state
    #[error("Transfer already finished as {0}")]
    Terminal(TransferState),
    /// Invalid transition
    #[error("Invalid {0} transition: From {1} to {2}")]
    InvalidTransition(Role, TransferState, TransferState),
}

#[inline]
/// Check if the state transition is allowed for `role`
///
/// Valid sender transitions:
/// - RequestingPermission -> WaitingForAddress, Rejected, Failed
/// - WaitingForAddress -> CreatingPackage, Failed
/// - CreatingPackage -> SendingPackage, Failed
/// - SendingPackage -> Completed, Failed
///
/// Valid recipient transitions:
/// - Approved -> GeneratingAddress, Failed
/// - GeneratingAddress -> WaitingForPackage, Failed
/// - WaitingForPackage -> CompletingTransfer, Failed
/// - CompletingTransfer -> Completed, Failed
pub fn check_state_transition(
    role: Role,
    current_state: TransferState,
    new_state: TransferState,
) -> Result<(), Error> {
    use TransferState::*;

    if current_state.is_terminal() {
        return Err(Error::Terminal(current_state));
    }

    if new_state == Failed {
        return Ok(());
    }

    let is_valid_transition = match role {
        Role::Sender => match current_state {
            RequestingPermission => matches!(new_state, WaitingForAddress | Rejected),
            WaitingForAddress => new_state == CreatingPackage,
            CreatingPackage => new_state == SendingPackage,
            SendingPackage => new_state == Completed,
            _ => false,
        },
        Role::Recipient => match current_state {
            Approved => new_state == GeneratingAddress,
            GeneratingAddress => new_state == WaitingForPackage,
            WaitingForPackage => new_state == CompletingTransfer,
            CompletingTransfer => new_state == Completed,
            _ => false,
        },
    };

    if !is_valid_transition {
        Err(Error::InvalidTransition(role, current_state, new_state))
    } else {
        Ok(())
    }
}
