//! The client authentication state machine.
//!
//! ```text
//! NewClient ──hello──▶ Unauthenticated ◀──SetStatus──▶ Authenticated
//!     │                      │                              │
//!     └──────────────────────┴──────────────┬───────────────┘
//!                                           ▼
//!                                       Rejected
//! ```

use crate::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    /// Connected, no hello yet.
    NewClient,
    /// Hello accepted; only anonymous packets allowed.
    Unauthenticated,
    /// Promoted by a cluster process; everything allowed.
    Authenticated,
    /// Terminal. The connection is being torn down.
    Rejected,
}

impl ClientState {
    /// Returns `true` if `self → to` is a legal move.
    ///
    /// Staying in `Unauthenticated` or `Authenticated` is legal (a repeated
    /// status change is a no-op). Nothing leaves `Rejected`.
    pub fn can_transition(self, to: ClientState) -> bool {
        use ClientState::*;
        match (self, to) {
            (Rejected, _) => false,
            (_, Rejected) => true,
            (NewClient, Unauthenticated) => true,
            (Unauthenticated | Authenticated, Unauthenticated | Authenticated) => true,
            _ => false,
        }
    }

    /// Performs the move.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] for an illegal move.
    pub fn transition(self, to: ClientState) -> Result<ClientState, SessionError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(SessionError::InvalidTransition { from: self, to })
        }
    }

    pub fn is_authenticated(self) -> bool {
        self == ClientState::Authenticated
    }

    /// Hello done, not rejected.
    pub fn is_established(self) -> bool {
        matches!(self, Self::Unauthenticated | Self::Authenticated)
    }
}
