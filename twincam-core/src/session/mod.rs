//! The pair session: one Tokio task per session that owns the status,
//! the clock synchronizer, the capture scheduler and the preview flow
//! controller.
//!
//! ```text
//!  PairHandle ──commands──►┐
//!  Transport ──events────►├─► session task ──SessionEvent──► application
//!  timers ────TimerEvent──►┘        │
//!                                   └──frames──► Transport
//! ```
//!
//! Everything that touches session state runs on that task, in arrival
//! order, so a reply or timer that outlives its connection finds the
//! state already reset and is dropped.

mod actor;
mod events;
mod handle;

pub use events::{SessionEvent, SessionEventReceiver};
pub use handle::{PairHandle, SessionStatus};

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clock::{Clock, SystemClock};
use crate::config::PairConfig;
use crate::error::PairError;
use crate::preview::PreviewFlowController;
use crate::state::PairRole;
use crate::transport::Transport;

use actor::SessionActor;

/// Builder for a pair session.
pub struct PairSession {
    role: PairRole,
    transport: Arc<dyn Transport>,
    config: PairConfig,
    clock: Arc<dyn Clock>,
}

impl PairSession {
    pub fn new(role: PairRole, transport: Arc<dyn Transport>) -> Self {
        Self {
            role,
            transport,
            config: PairConfig::default(),
            clock: Arc::new(SystemClock::new()),
        }
    }

    pub fn with_config(mut self, config: PairConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the session clock (tests simulate skewed devices).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start the session task. Must be called inside a Tokio runtime.
    pub fn spawn(self) -> Result<(PairHandle, SessionEventReceiver), PairError> {
        self.config.validate()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let preview = PreviewFlowController::new(self.config.preview_interval());
        let handle = PairHandle::new(self.role, command_tx, preview.credit());

        let actor = SessionActor::new(
            self.role,
            self.config,
            self.clock,
            self.transport,
            preview,
            command_rx,
            event_tx,
        );
        tokio::spawn(actor.run());
        Ok((handle, event_rx))
    }
}
