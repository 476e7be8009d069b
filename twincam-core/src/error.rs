//! Domain-specific error types for the pairing protocol.
//!
//! All fallible operations return `Result<T, PairError>`.
//! Errors that reach the application are wrapped in a [`SessionFault`]
//! carrying the step that failed.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::state::PairRole;

/// The canonical error type for the pairing protocol.
#[derive(Debug, Clone, Error)]
pub enum PairError {
    // ── Platform / Transport ─────────────────────────────────────
    /// A required OS permission has not been granted.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The radio or service is not supported or not enabled.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Scanning or advertising could not be started.
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    /// A service the transport depends on (e.g. location) is off.
    #[error("prerequisite service is off: {0}")]
    PrerequisiteServiceOff(String),

    // ── Protocol ─────────────────────────────────────────────────
    /// The peer sent an `Error` command.
    #[error("peer reported an error: {0}")]
    PeerReportedError(String),

    /// A received buffer could not be framed into a message.
    #[error("protocol framing: {0}")]
    ProtocolFraming(String),

    /// A synchronized capture could not be scheduled.
    #[error("sync aborted: {0}")]
    SyncAborted(String),

    /// The payload does not fit the 24-bit length field.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    // ── Session ──────────────────────────────────────────────────
    /// A pair-status transition was attempted from the wrong state.
    #[error("invalid transition: {0}")]
    InvalidTransition(&'static str),

    /// The operation needs a connected session.
    #[error("not connected")]
    NotConnected,

    /// The operation is reserved for the other role.
    #[error("operation requires the {0} role")]
    WrongRole(PairRole),

    /// An mpsc or oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// The I/O layer of a transport adapter reported an error.
    #[error("connection error: {0}")]
    Io(Arc<std::io::Error>),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PairError {
    /// Short human-readable title suitable for an alert header.
    pub fn title(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "Permission required",
            Self::TransportUnavailable(_) => "Pairing unavailable",
            Self::DiscoveryFailed(_) => "Could not find partner",
            Self::PrerequisiteServiceOff(_) => "Service disabled",
            Self::PeerReportedError(_) => "Partner device failed",
            Self::ProtocolFraming(_) => "Garbled message",
            Self::SyncAborted(_) => "Capture not synchronized",
            Self::PayloadTooLarge { .. } => "Image too large",
            Self::UnknownVariant { .. } => "Unknown message",
            Self::InvalidTransition(_) => "Pairing state error",
            Self::NotConnected => "Not paired",
            Self::WrongRole(_) => "Wrong pairing role",
            Self::ChannelClosed => "Session closed",
            Self::Io(_) => "Connection lost",
            Self::Config(_) => "Invalid settings",
        }
    }

    /// Whether this error ends the session.
    ///
    /// Lifecycle, permission and service errors force the session to
    /// `Disconnected`; everything else is informational.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_)
                | Self::TransportUnavailable(_)
                | Self::DiscoveryFailed(_)
                | Self::PrerequisiteServiceOff(_)
                | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for PairError {
    fn from(e: std::io::Error) -> Self {
        PairError::Io(Arc::new(e))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PairError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PairError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for PairError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        PairError::ChannelClosed
    }
}

// ── SessionFault ─────────────────────────────────────────────────

/// An error surfaced to the application, tagged with the step that
/// produced it.
#[derive(Debug, Clone)]
pub struct SessionFault {
    /// Label of the operation that failed, e.g. `"capture scheduling"`.
    pub step: String,
    pub error: PairError,
}

impl SessionFault {
    pub fn new(step: impl Into<String>, error: PairError) -> Self {
        Self {
            step: step.into(),
            error,
        }
    }

    pub fn title(&self) -> &'static str {
        self.error.title()
    }

    /// The underlying cause as a display string.
    pub fn cause(&self) -> String {
        self.error.to_string()
    }
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.title(), self.step, self.error)
    }
}

impl std::error::Error for SessionFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
