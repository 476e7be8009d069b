//! The transport port consumed by a pair session.
//!
//! A transport moves opaque byte buffers between the two devices and
//! reports lifecycle changes as [`TransportEvent`]s. It is expected to
//! deliver each sent buffer as one `PayloadReceived` on the other side;
//! stream transports use [`FrameCodec`](crate::codec::FrameCodec) to
//! restore those boundaries.

mod loopback;
mod tcp;

pub use loopback::LoopbackTransport;
pub use tcp::{TcpEndpoint, TcpTransport};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::PairError;
use crate::state::PairRole;

/// Something the transport observed.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A link to the peer is up.
    Connected,
    /// The link to the peer went away.
    Disconnected,
    /// One complete framed buffer from the peer.
    PayloadReceived(Bytes),
    /// A failure outside of any single call.
    ErrorOccurred { step: String, error: PairError },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Narrow interface to the platform transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Start scanning (Primary) or advertising (Secondary).
    ///
    /// Returns once discovery has started; the link itself is reported
    /// later as [`TransportEvent::Connected`] on `events`.
    async fn connect_as_role(
        &self,
        role: PairRole,
        events: TransportEventSender,
    ) -> Result<(), PairError>;

    /// Queue one framed buffer for the peer. Does not wait for delivery.
    async fn send(&self, frame: Bytes) -> Result<(), PairError>;

    /// Tear down the link or stop discovery.
    async fn disconnect(&self);
}
