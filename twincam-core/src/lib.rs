//! # twincam-core
//!
//! Pairing session protocol for a two-device synchronized stereo camera
//! rig.
//!
//! This crate contains:
//! - **Wire protocol**: `FrameHeader`, `Command`, `Message` and the `codec` functions
//! - **Clock sync**: `ClockSynchronizer` estimating the peer clock offset
//! - **Capture**: `CaptureScheduler` arming one shared capture instant
//! - **Preview**: `PreviewFlowController` keeping one preview frame in flight
//! - **Session**: `PairSession` / `PairHandle`, the orchestrating task
//! - **Transport**: the `Transport` port plus loopback and TCP adapters
//! - **Error**: `PairError` and `SessionFault`, typed with `thiserror`

pub mod capture;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod message;
pub mod permit;
pub mod preview;
pub mod session;
pub mod state;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{CapturePlan, CaptureScheduler};
pub use clock::{Clock, ClockSample, ClockSynchronizer, SyncEstimate, SystemClock, Ticks};
pub use codec::FrameCodec;
pub use config::PairConfig;
pub use error::{PairError, SessionFault};
pub use header::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{Command, Message};
pub use permit::Permit;
pub use preview::{PreviewDecision, PreviewFlowController};
pub use session::{PairHandle, PairSession, SessionEvent, SessionEventReceiver, SessionStatus};
pub use state::{PairRole, PairStatus};
pub use transport::{LoopbackTransport, TcpEndpoint, TcpTransport, Transport, TransportEvent};
