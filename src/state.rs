//! Trigger session states

use serde::{Deserialize, Serialize};

/// Where a session is in its save operation.
///
/// `Idle -> BeforeTriggersRunning -> Captured -> PersistInFlight ->
/// {AfterTriggersRunning | AfterFailedTriggersRunning} -> Done`.
/// A nested save on the same context re-enters `BeforeTriggersRunning` from
/// whichever state the outer save is in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    BeforeTriggersRunning,
    Captured,
    PersistInFlight,
    AfterTriggersRunning,
    AfterFailedTriggersRunning,
    Done,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Whether moving to `next` is a legal step
    pub fn can_transition(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Done, _) => false,
            (_, BeforeTriggersRunning) => true,
            (_, Done) => true,
            (BeforeTriggersRunning, Captured) => true,
            (Captured, PersistInFlight) => true,
            (PersistInFlight, AfterTriggersRunning) => true,
            (PersistInFlight, AfterFailedTriggersRunning) => true,
            // a nested save finished while the outer one was running before-triggers
            (AfterTriggersRunning | AfterFailedTriggersRunning, Captured) => true,
            _ => false,
        }
    }
}
