//! What a pair session reports to the application.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::clock::SyncEstimate;
use crate::error::SessionFault;

/// Upward notifications, delivered in the order the session produced
/// them.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The link to the peer is up.
    Connected,
    /// The link went down; all pending work has been cancelled.
    Disconnected,
    /// Something failed. Fatal faults are followed by `Disconnected`.
    ErrorOccurred(SessionFault),
    /// The Secondary said `Hello` (Primary only).
    PeerAnnounced,
    /// A clock-sync run finished.
    Synchronized(SyncEstimate),
    /// Whole seconds left before the pending capture.
    CountdownTick(u32),
    /// Capture now.
    CaptureRequested,
    /// The Primary wants a preview frame (Secondary only).
    PreviewFrameRequested,
    PreviewFrameReceived(Bytes),
    CapturedImageReceived(Bytes),
    /// The peer finished sending its captured image.
    TransmissionComplete,
}

impl SessionEvent {
    /// Short label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::ErrorOccurred(_) => "error",
            Self::PeerAnnounced => "peer-announced",
            Self::Synchronized(_) => "synchronized",
            Self::CountdownTick(_) => "countdown",
            Self::CaptureRequested => "capture-requested",
            Self::PreviewFrameRequested => "preview-requested",
            Self::PreviewFrameReceived(_) => "preview-frame",
            Self::CapturedImageReceived(_) => "captured-image",
            Self::TransmissionComplete => "transmission-complete",
        }
    }
}

pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;
pub(crate) type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;
