//! Clock-offset estimation between the two devices.
//!
//! The initiator runs `N` request/reply exchanges. Each exchange yields
//! one [`ClockSample`]; once all `N` are in, the samples are reduced to
//! a [`SyncEstimate`] with an outlier-trimmed mean offset and the worst
//! observed round trip.
//!
//! ```text
//! local   t0 ──RequestClockReading──►            ◄──ClockReading(t1t2)── t3
//! peer                               t1t2 (now)
//! ```

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use crate::permit::Permit;

/// Microseconds since the Unix epoch.
pub type Ticks = i64;

pub const TICKS_PER_MILLISECOND: Ticks = 1_000;
pub const TICKS_PER_SECOND: Ticks = 1_000_000;

// ── Clock ────────────────────────────────────────────────────────

/// Source of "now" for a session.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Ticks;
}

/// Wall clock anchored once, then advanced by the monotonic clock.
///
/// Wall-clock adjustments after construction do not move pending
/// capture instants. Under a paused Tokio runtime it advances with
/// Tokio's virtual time.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_wall: Ticks,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as Ticks)
            .unwrap_or_default();
        Self::at(wall)
    }

    /// A clock that reads `offset` ticks ahead of this device's.
    pub fn skewed(offset: Ticks) -> Self {
        let base = Self::new();
        Self::at(base.anchor_wall + offset)
    }

    /// A clock that reads `wall` right now.
    pub fn at(wall: Ticks) -> Self {
        Self {
            anchor_wall: wall,
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Ticks {
        self.anchor_wall + self.anchor.elapsed().as_micros() as Ticks
    }
}

// ── Samples and estimate ─────────────────────────────────────────

/// One completed request/reply exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSample {
    /// Local time the request was sent.
    pub t0: Ticks,
    /// Peer time reported in the reply.
    pub t1t2: Ticks,
    /// Local time the reply arrived.
    pub t3: Ticks,
}

impl ClockSample {
    /// Estimated `peer − local` for this exchange.
    ///
    /// Widened to `i128`: `t1t2` comes off the wire and may hold any
    /// `i64`.
    pub fn offset(&self) -> f64 {
        let t1t2 = i128::from(self.t1t2);
        ((t1t2 - i128::from(self.t0)) + (t1t2 - i128::from(self.t3))) as f64 / 2.0
    }

    pub fn round_trip(&self) -> Ticks {
        self.t3.saturating_sub(self.t0)
    }
}

/// Result of a complete synchronization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncEstimate {
    /// `peer_clock − local_clock`.
    pub offset_ticks: i64,
    /// Largest round trip seen during the run.
    pub round_trip_ticks: u64,
}

impl SyncEstimate {
    /// Reduce a full run of samples. Returns `None` for an empty run.
    pub fn from_samples(samples: &[ClockSample]) -> Option<Self> {
        let offsets: Vec<f64> = samples.iter().map(ClockSample::offset).collect();
        let offset = trimmed_mean(&offsets)?;
        let round_trip = samples
            .iter()
            .map(|s| s.round_trip().max(0) as u64)
            .max()
            .unwrap_or_default();
        // `as` saturates; an absurd peer clock pins to the i64 range.
        Some(Self {
            offset_ticks: offset.round() as i64,
            round_trip_ticks: round_trip,
        })
    }

    /// Translate a local instant into the peer's clock. `None` if the
    /// result does not fit in [`Ticks`].
    pub fn to_peer(&self, local: Ticks) -> Option<Ticks> {
        local.checked_add(self.offset_ticks)
    }
}

/// Mean of the values lying strictly within one population standard
/// deviation of the overall mean.
///
/// Falls back to the plain mean when nothing qualifies (all values
/// equal).
pub fn trimmed_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

    let kept: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| (v - mean).abs() < std_dev)
        .collect();
    if kept.is_empty() {
        return Some(mean);
    }
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

// ── ClockSynchronizer ────────────────────────────────────────────

/// What the caller should do after feeding a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncProgress {
    /// No run was waiting for a reading; nothing to do.
    Ignored,
    /// Send the next `RequestClockReading` now.
    NextSample { index: usize },
    /// The run finished.
    Complete(SyncEstimate),
}

#[derive(Debug)]
struct SyncRun {
    samples: Vec<ClockSample>,
    /// Send time of the request currently awaiting its reply.
    pending_t0: Ticks,
}

/// Collects the samples of one synchronization run at a time.
///
/// The "already running" guard is a [`Permit`], so a second `begin`
/// while a run is in flight is refused without blocking.
#[derive(Debug)]
pub struct ClockSynchronizer {
    sample_count: usize,
    guard: Permit,
    run: Option<SyncRun>,
}

impl ClockSynchronizer {
    pub fn new(sample_count: usize) -> Self {
        Self {
            sample_count: sample_count.max(1),
            guard: Permit::new(),
            run: None,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_claimed()
    }

    /// Number of samples collected by the current run.
    pub fn collected(&self) -> usize {
        self.run.as_ref().map_or(0, |r| r.samples.len())
    }

    /// Start a run whose first request is sent at `now`.
    ///
    /// Returns `false` if a run is already in progress.
    pub fn begin(&mut self, now: Ticks) -> bool {
        if !self.guard.try_claim() {
            return false;
        }
        self.run = Some(SyncRun {
            samples: Vec::with_capacity(self.sample_count),
            pending_t0: now,
        });
        true
    }

    /// Feed the peer's reading `t1t2`, received at local `now`.
    ///
    /// On [`SyncProgress::NextSample`] the next request is assumed to
    /// leave at `now`.
    pub fn on_reading(&mut self, t1t2: Ticks, now: Ticks) -> SyncProgress {
        let Some(run) = self.run.as_mut() else {
            return SyncProgress::Ignored;
        };
        run.samples.push(ClockSample {
            t0: run.pending_t0,
            t1t2,
            t3: now,
        });

        if run.samples.len() < self.sample_count {
            run.pending_t0 = now;
            return SyncProgress::NextSample {
                index: run.samples.len(),
            };
        }

        let samples = self.run.take().map(|r| r.samples).unwrap_or_default();
        self.guard.release();
        match SyncEstimate::from_samples(&samples) {
            Some(estimate) => SyncProgress::Complete(estimate),
            None => SyncProgress::Ignored,
        }
    }

    /// Drop any in-progress run. Returns `true` if one was abandoned.
    pub fn abandon(&mut self) -> bool {
        self.run = None;
        self.guard.release()
    }
}

// ── Tests ────────────────────────────────────────────────────────
