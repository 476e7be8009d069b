//! Synchronized-capture scheduling.
//!
//! The Primary turns a [`SyncEstimate`] into a [`CapturePlan`]: a local
//! capture instant plus the same instant expressed in the peer's clock.
//! Both sides then arm a one-shot timer through [`CaptureScheduler`],
//! which owns at most one pending [`CaptureMoment`].
//!
//! Timers run as Tokio tasks that report back through a channel of
//! [`TimerEvent`]s tagged with a generation number; events from a
//! replaced or cancelled moment carry a stale generation and are
//! ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::clock::{SyncEstimate, TICKS_PER_SECOND, Ticks};
use crate::error::PairError;

// ── Planning ─────────────────────────────────────────────────────

/// Furthest ahead a capture may be scheduled. Also caps the configured
/// countdown.
pub const MAX_CAPTURE_DELAY: Duration = Duration::from_secs(3_600);

/// Where and when the Primary wants both devices to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturePlan {
    /// Capture instant in the local clock.
    pub local_target: Ticks,
    /// The same instant in the peer's clock; sent as `Sync`.
    pub partner_target: Ticks,
    /// Time left until `local_target`.
    pub delay: Duration,
}

fn out_of_range(what: &str) -> PairError {
    PairError::SyncAborted(format!("{what} does not fit the tick range"))
}

/// Plan a capture on the Primary.
///
/// The safety buffer is the configured countdown, or the measured worst
/// round trip when no countdown is configured.
pub fn plan_primary(
    estimate: &SyncEstimate,
    countdown: Duration,
    now: Ticks,
) -> Result<CapturePlan, PairError> {
    let buffer = if countdown.is_zero() {
        Ticks::try_from(estimate.round_trip_ticks)
    } else {
        Ticks::try_from(countdown.as_micros())
    }
    .map_err(|_| out_of_range("capture buffer"))?;
    let local_target = now
        .checked_add(buffer)
        .ok_or_else(|| out_of_range("local capture instant"))?;
    let partner_target = estimate
        .to_peer(local_target)
        .ok_or_else(|| out_of_range("partner capture instant"))?;
    Ok(CapturePlan {
        local_target,
        partner_target,
        delay: delay_until(local_target, now)?,
    })
}

/// Time from `now` until `target`.
///
/// A target that is not strictly in the future is refused: firing
/// immediately would capture with no warning. So is one further out
/// than [`MAX_CAPTURE_DELAY`].
pub fn delay_until(target: Ticks, now: Ticks) -> Result<Duration, PairError> {
    let delta = i128::from(target) - i128::from(now);
    if delta <= 0 {
        return Err(PairError::SyncAborted(format!(
            "capture instant is {} µs in the past",
            -delta
        )));
    }
    u64::try_from(delta)
        .ok()
        .map(Duration::from_micros)
        .filter(|delay| *delay <= MAX_CAPTURE_DELAY)
        .ok_or_else(|| {
            PairError::SyncAborted(format!(
                "capture instant is {delta} µs away, beyond {}s",
                MAX_CAPTURE_DELAY.as_secs()
            ))
        })
}

/// Whole seconds shown by a countdown with `delay` remaining.
pub fn countdown_seconds(delay: Duration) -> u32 {
    let micros = delay.as_micros() as i64;
    ((micros + TICKS_PER_SECOND - 1) / TICKS_PER_SECOND) as u32
}

// ── Timers ───────────────────────────────────────────────────────

/// Reported by timer tasks back to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// The capture instant of moment `generation` was reached.
    CaptureDue { generation: u64 },
    /// One countdown step of moment `generation`.
    CountdownTick { generation: u64, remaining: u32 },
}

pub type TimerEventSender = mpsc::UnboundedSender<TimerEvent>;

/// A spawned timer task, aborted when the handle is dropped.
#[derive(Debug)]
pub struct ArmedTimer {
    handle: JoinHandle<()>,
}

impl ArmedTimer {
    /// Fire `CaptureDue` once after `delay`.
    pub fn capture(tx: TimerEventSender, generation: u64, delay: Duration) -> Self {
        let deadline = Instant::now() + delay;
        Self {
            handle: tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                let _ = tx.send(TimerEvent::CaptureDue { generation });
            }),
        }
    }

    /// Tick once per second from `ceil(delay)` down to 1.
    pub fn countdown(tx: TimerEventSender, generation: u64, delay: Duration) -> Self {
        let seconds = countdown_seconds(delay);
        Self {
            handle: tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                for remaining in (1..=seconds).rev() {
                    interval.tick().await;
                    if tx
                        .send(TimerEvent::CountdownTick {
                            generation,
                            remaining,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            }),
        }
    }
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ── CaptureScheduler ─────────────────────────────────────────────

/// The single pending capture of a session.
#[derive(Debug)]
pub struct CaptureMoment {
    /// Capture instant in the local clock.
    pub target: Ticks,
    generation: u64,
    fired: bool,
    _capture_timer: ArmedTimer,
    countdown_timer: Option<ArmedTimer>,
}

impl CaptureMoment {
    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owns the session's at-most-one [`CaptureMoment`].
#[derive(Debug)]
pub struct CaptureScheduler {
    timer_tx: TimerEventSender,
    next_generation: u64,
    pending: Option<CaptureMoment>,
}

impl CaptureScheduler {
    pub fn new(timer_tx: TimerEventSender) -> Self {
        Self {
            timer_tx,
            next_generation: 1,
            pending: None,
        }
    }

    /// Arm a capture at `target`, `delay` from now, replacing any
    /// pending moment. Returns the new moment's generation.
    pub fn arm(&mut self, target: Ticks, delay: Duration, with_countdown: bool) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;

        if let Some(previous) = self.pending.take() {
            debug!(generation = previous.generation, "replacing pending capture");
        }
        let countdown_timer = with_countdown
            .then(|| ArmedTimer::countdown(self.timer_tx.clone(), generation, delay));
        self.pending = Some(CaptureMoment {
            target,
            generation,
            fired: false,
            _capture_timer: ArmedTimer::capture(self.timer_tx.clone(), generation, delay),
            countdown_timer,
        });
        generation
    }

    /// Mark moment `generation` as fired.
    ///
    /// Returns `false` for a stale, cancelled or already-fired moment.
    /// The moment stays pending until [`clear`](Self::clear).
    pub fn on_fired(&mut self, generation: u64) -> bool {
        match self.pending.as_mut() {
            Some(moment) if moment.generation == generation && !moment.fired => {
                moment.fired = true;
                moment.countdown_timer = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a countdown tick of `generation` should be shown.
    pub fn is_counting_down(&self, generation: u64) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|m| m.generation == generation && !m.fired)
    }

    pub fn pending(&self) -> Option<&CaptureMoment> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Cancel timers and drop the pending moment. Returns `true` if one
    /// existed.
    pub fn clear(&mut self) -> bool {
        // Dropping the moment aborts both timer tasks.
        self.pending.take().is_some()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn estimate(offset: i64, round_trip: u64) -> SyncEstimate {
        SyncEstimate {
            offset_ticks: offset,
            round_trip_ticks: round_trip,
        }
    }

    #[test]
    fn plan_uses_round_trip_without_countdown() {
        let plan = plan_primary(&estimate(500, 40_000), Duration::ZERO, 1_000_000).unwrap();
        assert_eq!(plan.local_target, 1_040_000);
        assert_eq!(plan.partner_target, 1_040_500);
        assert_eq!(plan.delay, Duration::from_millis(40));
    }

    #[test]
    fn plan_prefers_configured_countdown() {
        let plan = plan_primary(&estimate(-7, 40_000), Duration::from_secs(3), 0).unwrap();
        assert_eq!(plan.local_target, 3 * TICKS_PER_SECOND);
        assert_eq!(plan.partner_target, 3 * TICKS_PER_SECOND - 7);
        assert_eq!(plan.delay, Duration::from_secs(3));
    }

    #[test]
    fn plan_aborts_on_zero_buffer() {
        let result = plan_primary(&estimate(0, 0), Duration::ZERO, 5);
        assert!(matches!(result, Err(PairError::SyncAborted(_))));
    }

    #[test]
    fn delay_must_be_positive() {
        assert_eq!(delay_until(150, 100).unwrap(), Duration::from_micros(50));
        assert!(matches!(delay_until(100, 100), Err(PairError::SyncAborted(_))));
        assert!(matches!(delay_until(99, 100), Err(PairError::SyncAborted(_))));
    }

    #[test]
    fn extreme_targets_are_refused_not_wrapped() {
        assert!(matches!(delay_until(i64::MIN, i64::MAX), Err(PairError::SyncAborted(_))));
        assert!(matches!(delay_until(i64::MAX, i64::MIN), Err(PairError::SyncAborted(_))));
        assert!(matches!(delay_until(i64::MAX, 0), Err(PairError::SyncAborted(_))));
        assert!(matches!(delay_until(i64::MIN, 0), Err(PairError::SyncAborted(_))));

        let at_limit = MAX_CAPTURE_DELAY.as_micros() as i64;
        assert_eq!(delay_until(at_limit, 0).unwrap(), MAX_CAPTURE_DELAY);
        assert!(delay_until(at_limit + 1, 0).is_err());
    }

    #[test]
    fn plan_refuses_offsets_outside_tick_range() {
        let result = plan_primary(&estimate(i64::MAX, 10), Duration::ZERO, 1_000);
        assert!(matches!(result, Err(PairError::SyncAborted(_))));

        let result = plan_primary(&estimate(0, u64::MAX), Duration::ZERO, 0);
        assert!(matches!(result, Err(PairError::SyncAborted(_))));

        let result = plan_primary(&estimate(0, 10), Duration::from_secs(1), i64::MAX - 10);
        assert!(matches!(result, Err(PairError::SyncAborted(_))));
    }

    #[test]
    fn countdown_rounds_up() {
        assert_eq!(countdown_seconds(Duration::from_millis(2_001)), 3);
        assert_eq!(countdown_seconds(Duration::from_secs(3)), 3);
        assert_eq!(countdown_seconds(Duration::from_millis(400)), 1);
        assert_eq!(countdown_seconds(Duration::ZERO), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn armed_capture_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = CaptureScheduler::new(tx);
        let generation = scheduler.arm(0, Duration::from_millis(250), false);

        let event = rx.recv().await.unwrap();
        assert_eq!(event, TimerEvent::CaptureDue { generation });
        assert!(scheduler.on_fired(generation));
        assert!(!scheduler.on_fired(generation));
        assert!(scheduler.pending().unwrap().has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_moment() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = CaptureScheduler::new(tx);
        let first = scheduler.arm(0, Duration::from_millis(100), false);
        let second = scheduler.arm(0, Duration::from_millis(300), false);
        assert_ne!(first, second);

        // Only the replacement's timer is alive.
        let event = rx.recv().await.unwrap();
        assert_eq!(event, TimerEvent::CaptureDue { generation: second });
        assert!(!scheduler.on_fired(first));
        assert!(scheduler.on_fired(second));
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_moment_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = CaptureScheduler::new(tx);
        scheduler.arm(0, Duration::from_millis(100), true);
        assert!(scheduler.clear());
        assert!(!scheduler.is_pending());

        tokio::time::sleep(Duration::from_secs(2)).await;
        // The countdown's immediate first tick may have been queued
        // before the abort; the capture itself must not be.
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, TimerEvent::CaptureDue { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_down_to_one() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = CaptureScheduler::new(tx);
        let generation = scheduler.arm(0, Duration::from_millis(2_500), true);

        let mut ticks = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                TimerEvent::CountdownTick { remaining, .. } => {
                    assert!(scheduler.is_counting_down(generation));
                    ticks.push(remaining);
                }
                TimerEvent::CaptureDue { generation: g } => {
                    assert_eq!(g, generation);
                    break;
                }
            }
        }
        assert_eq!(ticks, vec![3, 2, 1]);
    }
}
