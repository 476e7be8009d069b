//! Pair session connection state machine.
//!
//! Models the lifecycle of one pairing attempt with validated
//! transitions that return `Result` instead of panicking.

use crate::error::PairError;

// ── PairStatus ───────────────────────────────────────────────────

/// The current phase of a pair session.
///
/// ```text
///  Disconnected ──► Connecting ──► Connected
///       ▲                │              │
///       └────────────────┴──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairStatus {
    /// No active connection. Initial / terminal state.
    #[default]
    Disconnected,

    /// The transport is scanning or advertising.
    Connecting,

    /// The transport reported a live link.
    Connected,
}

impl std::fmt::Display for PairStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

impl PairStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `Disconnected`.
    pub fn begin_connect(&mut self) -> Result<(), PairError> {
        match self {
            Self::Disconnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(PairError::InvalidTransition(
                "cannot connect: not in Disconnected state",
            )),
        }
    }

    /// Transition to `Connected`.
    ///
    /// Valid from: `Connecting`.
    pub fn complete_connect(&mut self) -> Result<(), PairError> {
        match self {
            Self::Connecting => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(PairError::InvalidTransition(
                "cannot complete connect: not in Connecting state",
            )),
        }
    }

    /// Reset to `Disconnected` from any state.
    pub fn force_disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut status = PairStatus::Disconnected;

        status.begin_connect().unwrap();
        assert_eq!(status, PairStatus::Connecting);

        status.complete_connect().unwrap();
        assert!(status.is_connected());

        status.force_disconnect();
        assert!(status.is_disconnected());

        // The loop may start again.
        status.begin_connect().unwrap();
    }

    #[test]
    fn invalid_transition_connect_when_connected() {
        let mut status = PairStatus::Connected;
        assert!(status.begin_connect().is_err());
        assert!(status.complete_connect().is_err());
    }

    #[test]
    fn invalid_transition_complete_from_disconnected() {
        let mut status = PairStatus::Disconnected;
        assert!(matches!(
            status.complete_connect(),
            Err(PairError::InvalidTransition(_))
        ));
        assert!(status.is_disconnected());
    }

    #[test]
    fn connect_failure_returns_to_disconnected() {
        let mut status = PairStatus::Connecting;
        status.force_disconnect();
        assert!(status.is_disconnected());
        status.force_disconnect();
        assert!(status.is_disconnected());
    }

    #[test]
    fn display_format() {
        assert_eq!(PairStatus::Disconnected.to_string(), "Disconnected");
        assert_eq!(PairStatus::Connecting.to_string(), "Connecting");
        assert_eq!(PairStatus::Connected.to_string(), "Connected");
    }

    #[test]
    fn default_status_is_disconnected() {
        assert!(PairStatus::default().is_disconnected());
    }
}
