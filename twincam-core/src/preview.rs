//! Preview-frame flow control.
//!
//! The Primary pulls preview frames one at a time. A request is only
//! sent when no capture is pending, the minimum interval has passed, and
//! the single preview credit can be claimed. The credit comes back when
//! the frame arrives, so at most one frame is ever in flight.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::permit::Permit;

/// Outcome of one preview tick on the Primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewDecision {
    /// `RequestPreviewFrame` was sent.
    Requested,
    /// A capture is pending; the link is reserved for it.
    CapturePending,
    /// The minimum interval since the last request has not passed.
    TooSoon,
    /// A previous request has not been answered yet.
    InFlight,
    /// The session is not connected.
    NotConnected,
}

impl PreviewDecision {
    pub fn was_requested(&self) -> bool {
        matches!(self, Self::Requested)
    }
}

impl fmt::Display for PreviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Requested => "requested",
            Self::CapturePending => "capture pending",
            Self::TooSoon => "too soon",
            Self::InFlight => "frame in flight",
            Self::NotConnected => "not connected",
        };
        f.write_str(text)
    }
}

/// One-frame-in-flight request pacing.
#[derive(Debug)]
pub struct PreviewFlowController {
    credit: Arc<Permit>,
    min_interval: Duration,
    last_request: Option<Instant>,
}

impl PreviewFlowController {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            credit: Arc::new(Permit::new()),
            min_interval,
            last_request: None,
        }
    }

    /// Shared view of the preview credit.
    pub fn credit(&self) -> Arc<Permit> {
        Arc::clone(&self.credit)
    }

    /// Decide whether a request may go out at `now`.
    ///
    /// On [`PreviewDecision::Requested`] the credit is held and the
    /// caller must send `RequestPreviewFrame`.
    pub fn try_request(&mut self, capture_pending: bool, now: Instant) -> PreviewDecision {
        if capture_pending {
            return PreviewDecision::CapturePending;
        }
        if let Some(last) = self.last_request {
            if now.saturating_duration_since(last) < self.min_interval {
                return PreviewDecision::TooSoon;
            }
        }
        if !self.credit.try_claim() {
            return PreviewDecision::InFlight;
        }
        self.last_request = Some(now);
        PreviewDecision::Requested
    }

    /// A preview frame arrived. Returns `true` if a credit was held.
    pub fn on_frame(&self) -> bool {
        self.credit.release()
    }

    /// Return the credit after a request could not be sent.
    pub fn cancel_request(&mut self) {
        self.credit.release();
        self.last_request = None;
    }

    pub fn reset(&mut self) {
        self.credit.release();
        self.last_request = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_request_waits_for_frame() {
        let mut flow = PreviewFlowController::new(Duration::ZERO);
        let now = Instant::now();
        assert_eq!(flow.try_request(false, now), PreviewDecision::Requested);
        assert_eq!(flow.try_request(false, now), PreviewDecision::InFlight);
        assert!(flow.on_frame());
        assert_eq!(flow.try_request(false, now), PreviewDecision::Requested);
    }

    #[test]
    fn minimum_interval_is_enforced() {
        let mut flow = PreviewFlowController::new(Duration::from_millis(100));
        let start = Instant::now();
        assert!(flow.try_request(false, start).was_requested());
        flow.on_frame();
        assert_eq!(
            flow.try_request(false, start + Duration::from_millis(50)),
            PreviewDecision::TooSoon
        );
        assert!(
            flow.try_request(false, start + Duration::from_millis(100))
                .was_requested()
        );
    }

    #[test]
    fn pending_capture_suppresses_requests() {
        let mut flow = PreviewFlowController::new(Duration::ZERO);
        assert_eq!(
            flow.try_request(true, Instant::now()),
            PreviewDecision::CapturePending
        );
        assert!(!flow.credit().is_claimed());
    }

    #[test]
    fn reset_frees_credit() {
        let mut flow = PreviewFlowController::new(Duration::from_secs(10));
        let credit = flow.credit();
        assert!(flow.try_request(false, Instant::now()).was_requested());
        assert!(credit.is_claimed());
        flow.reset();
        assert!(!credit.is_claimed());
        assert!(flow.try_request(false, Instant::now()).was_requested());
    }

    #[test]
    fn unsolicited_frame_is_harmless() {
        let flow = PreviewFlowController::new(Duration::ZERO);
        assert!(!flow.on_frame());
    }
}
