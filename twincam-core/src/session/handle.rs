//! Application-facing handle to a running pair session.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::PairError;
use crate::permit::Permit;
use crate::preview::PreviewDecision;
use crate::state::{PairRole, PairStatus};

type Reply<T> = oneshot::Sender<Result<T, PairError>>;

/// Requests from [`PairHandle`] to the session task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    BeginPairing { reply: Reply<()> },
    Disconnect { reply: oneshot::Sender<()> },
    RequestSyncedCapture { reply: Reply<()> },
    RequestPreviewFrame { reply: Reply<PreviewDecision> },
    SendPreviewFrame { frame: Bytes, reply: Reply<()> },
    SendCapturedImage { image: Bytes, reply: Reply<()> },
    SendError { reason: String, reply: Reply<()> },
    Status { reply: oneshot::Sender<SessionStatus> },
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub role: PairRole,
    pub status: PairStatus,
    /// A capture moment is armed or waiting for its image.
    pub capture_pending: bool,
    /// A clock-sync run is collecting samples.
    pub sync_running: bool,
}

/// Cloneable handle to a session task. The task shuts down once every
/// handle has been dropped.
#[derive(Debug, Clone)]
pub struct PairHandle {
    role: PairRole,
    commands: mpsc::UnboundedSender<SessionCommand>,
    preview_credit: Arc<Permit>,
}

impl PairHandle {
    pub(crate) fn new(
        role: PairRole,
        commands: mpsc::UnboundedSender<SessionCommand>,
        preview_credit: Arc<Permit>,
    ) -> Self {
        Self {
            role,
            commands,
            preview_credit,
        }
    }

    pub fn role(&self) -> PairRole {
        self.role
    }

    /// Whether a preview request is waiting for its frame.
    pub fn preview_in_flight(&self) -> bool {
        self.preview_credit.is_claimed()
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, PairError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(make(reply))?;
        Ok(rx.await?)
    }

    fn require(&self, role: PairRole) -> Result<(), PairError> {
        if self.role == role {
            Ok(())
        } else {
            Err(PairError::WrongRole(role))
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Start scanning for the Secondary. Resolves once connected.
    pub async fn begin_pairing_as_primary(&self) -> Result<(), PairError> {
        self.require(PairRole::Primary)?;
        self.call(|reply| SessionCommand::BeginPairing { reply }).await?
    }

    /// Start advertising to the Primary. Resolves once connected.
    pub async fn begin_pairing_as_secondary(&self) -> Result<(), PairError> {
        self.require(PairRole::Secondary)?;
        self.call(|reply| SessionCommand::BeginPairing { reply }).await?
    }

    /// Drop the link and cancel everything pending. Idempotent.
    pub async fn disconnect(&self) -> Result<(), PairError> {
        self.call(|reply| SessionCommand::Disconnect { reply }).await
    }

    pub async fn status(&self) -> Result<SessionStatus, PairError> {
        self.call(|reply| SessionCommand::Status { reply }).await
    }

    // ── Capture ──────────────────────────────────────────────────

    /// Measure the peer's clock afresh and schedule a capture on both
    /// devices.
    pub async fn request_synced_capture(&self) -> Result<(), PairError> {
        self.require(PairRole::Primary)?;
        self.call(|reply| SessionCommand::RequestSyncedCapture { reply })
            .await?
    }

    /// Send the full-resolution image followed by `TransmissionComplete`
    /// and clear the local pending capture.
    pub async fn send_captured_image(&self, image: impl Into<Bytes>) -> Result<(), PairError> {
        let image = image.into();
        self.call(|reply| SessionCommand::SendCapturedImage { image, reply })
            .await?
    }

    // ── Preview ──────────────────────────────────────────────────

    /// One preview tick on the Primary.
    pub async fn request_preview_frame(&self) -> Result<PreviewDecision, PairError> {
        self.require(PairRole::Primary)?;
        self.call(|reply| SessionCommand::RequestPreviewFrame { reply })
            .await?
    }

    pub async fn send_preview_frame(&self, frame: impl Into<Bytes>) -> Result<(), PairError> {
        let frame = frame.into();
        self.call(|reply| SessionCommand::SendPreviewFrame { frame, reply })
            .await?
    }

    // ── Errors ───────────────────────────────────────────────────

    /// Tell the peer that a local operation failed.
    pub async fn send_error(&self, reason: impl Into<String>) -> Result<(), PairError> {
        let reason = reason.into();
        self.call(|reply| SessionCommand::SendError { reason, reply })
            .await?
    }
}
