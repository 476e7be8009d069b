//! Protocol command codes and the decoded [`Message`] value.
//!
//! Unknown codes surface as errors through `TryFrom`, never as panics.

use std::fmt;

use bytes::Bytes;

use crate::error::PairError;
use crate::state::PairRole;

// ── Command ──────────────────────────────────────────────────────

/// All commands understood by the pairing protocol.
///
/// Codes are stable on the wire and must never be renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Secondary announces itself right after connecting.
    Hello = 1,
    /// Primary asks for one preview frame.
    RequestPreviewFrame = 2,
    /// A preview frame (Secondary → Primary).
    PreviewFrame = 3,
    /// Primary asks for the peer's current clock.
    RequestClockReading = 4,
    /// The peer's clock, one big-endian `i64` tick value.
    ClockReading = 5,
    /// Capture instant translated into the receiver's clock.
    Sync = 6,
    /// The full-resolution captured image.
    CapturedImage = 7,
    /// The captured image has been fully sent.
    TransmissionComplete = 8,
    /// The sender failed during its own operation.
    Error = 9,
}

impl TryFrom<u8> for Command {
    type Error = PairError;

    fn try_from(value: u8) -> Result<Self, PairError> {
        match value {
            1 => Ok(Command::Hello),
            2 => Ok(Command::RequestPreviewFrame),
            3 => Ok(Command::PreviewFrame),
            4 => Ok(Command::RequestClockReading),
            5 => Ok(Command::ClockReading),
            6 => Ok(Command::Sync),
            7 => Ok(Command::CapturedImage),
            8 => Ok(Command::TransmissionComplete),
            9 => Ok(Command::Error),
            _ => Err(PairError::UnknownVariant {
                type_name: "Command",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Command {
    /// Returns `true` if a session playing `role` should act on this
    /// command when it arrives from the peer.
    pub fn accepted_by(&self, role: PairRole) -> bool {
        match self {
            Command::Hello
            | Command::PreviewFrame
            | Command::ClockReading
            | Command::CapturedImage
            | Command::TransmissionComplete => role == PairRole::Primary,
            Command::RequestPreviewFrame | Command::Sync => role == PairRole::Secondary,
            // Either side may measure the other's clock or report a failure.
            Command::RequestClockReading | Command::Error => true,
        }
    }
}

// ── Message ──────────────────────────────────────────────────────

/// One protocol message: a command and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub payload: Bytes,
}

impl Message {
    pub fn new(command: Command, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// A message with no payload.
    pub fn bare(command: Command) -> Self {
        Self::new(command, Bytes::new())
    }

    /// A message carrying one tick value (`ClockReading`, `Sync`).
    pub fn with_ticks(command: Command, ticks: i64) -> Self {
        Self::new(command, Bytes::copy_from_slice(&ticks.to_be_bytes()))
    }

    /// An `Error` message with a human-readable reason.
    pub fn error(reason: &str) -> Self {
        Self::new(Command::Error, Bytes::copy_from_slice(reason.as_bytes()))
    }

    /// Read the payload as one big-endian tick value.
    pub fn ticks(&self) -> Result<i64, PairError> {
        let raw: [u8; 8] = self.payload.as_ref().try_into().map_err(|_| {
            PairError::ProtocolFraming(format!(
                "{} payload must be 8 bytes, got {}",
                self.command,
                self.payload.len()
            ))
        })?;
        Ok(i64::from_be_bytes(raw))
    }

    /// The reason text of an `Error` message, lossily decoded.
    pub fn reason(&self) -> String {
        if self.payload.is_empty() {
            "unspecified failure".to_string()
        } else {
            String::from_utf8_lossy(&self.payload).into_owned()
        }
    }
}
