//! Clock synchronization against the authoritative server clock
//!
//! Estimates the offset between the local wall clock and the server clock
//! from a single round trip. One-way latency is assumed to be symmetric, so
//! the server timestamp is compared against the midpoint of the round trip.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

/// Default interval between safety-net recalibrations (ms)
pub const DEFAULT_RECALIBRATION_INTERVAL_MS: u64 = 60_000;

/// Default nominal interval between heartbeat ticks (ms)
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Default divergence between heartbeat ticks that counts as a time jump (ms)
pub const DEFAULT_TIME_JUMP_THRESHOLD_MS: u64 = 2_000;

/// Errors from a single calibration round trip
#[derive(Debug, Clone, Error)]
pub enum ClockError {
    #[error("clock endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("malformed clock response: {0}")]
    Malformed(String),

    #[error("local clock went backwards during round trip ({0}ms)")]
    NegativeRoundTrip(i64),
}

/// Source of local wall-clock time in milliseconds since the UNIX epoch
pub trait LocalClock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The real system wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl LocalClock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Anything that can report authoritative server time
#[async_trait]
pub trait ClockSource: Send + Sync {
    /// Fetch the server's current time in milliseconds since the UNIX epoch
    async fn server_time_ms(&self) -> Result<i64, ClockError>;
}

/// Estimated offset between local and server time
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClockOffset {
    /// Amount to add to local time to approximate server time
    pub offset_ms: i64,
    /// Round trip of the measurement this offset came from (None = never calibrated)
    pub round_trip_ms: Option<u64>,
}

impl ClockOffset {
    /// Offset derived from one round trip: `server - (t0 + rtt/2)`.
    ///
    /// None when the timestamps are too far apart to represent.
    pub fn from_round_trip(t0_ms: i64, t1_ms: i64, server_ms: i64) -> Option<Self> {
        let rtt = t1_ms.checked_sub(t0_ms)?;
        let midpoint = t0_ms.checked_add(rtt / 2)?;
        Some(Self {
            offset_ms: server_ms.checked_sub(midpoint)?,
            round_trip_ms: Some(rtt.max(0) as u64),
        })
    }

    pub fn is_calibrated(&self) -> bool {
        self.round_trip_ms.is_some()
    }

    /// Apply this offset to a local timestamp
    pub fn synced_time_ms(&self, local_ms: i64) -> i64 {
        local_ms.saturating_add(self.offset_ms)
    }
}

/// Why a calibration was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationTrigger {
    Initial,
    Interval,
    VisibilityRegained,
    TimeJump,
    Manual,
}

impl CalibrationTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationTrigger::Initial => "initial",
            CalibrationTrigger::Interval => "interval",
            CalibrationTrigger::VisibilityRegained => "visibility",
            CalibrationTrigger::TimeJump => "time-jump",
            CalibrationTrigger::Manual => "manual",
        }
    }
}

/// Run one round trip and compute a fresh offset.
pub async fn measure_offset<S, C>(source: &S, clock: &C) -> Result<ClockOffset, ClockError>
where
    S: ClockSource + ?Sized,
    C: LocalClock + ?Sized,
{
    let t0 = clock.now_ms();
    let server_ms = source.server_time_ms().await?;
    let t1 = clock.now_ms();

    if t1 < t0 {
        return Err(ClockError::NegativeRoundTrip(t1 - t0));
    }

    let offset = ClockOffset::from_round_trip(t0, t1, server_ms)
        .ok_or_else(|| ClockError::Malformed(format!("server time {} out of range", server_ms)))?;
    tracing::debug!(
        "Clock calibrated: offset={:+}ms, rtt={}ms",
        offset.offset_ms,
        t1 - t0
    );
    Ok(offset)
}

/// Calibrate, falling back to `previous` when the round trip fails.
///
/// Never fails: an unsynchronized player is preferable to a frozen one.
pub async fn calibrate<S, C>(source: &S, clock: &C, previous: ClockOffset) -> ClockOffset
where
    S: ClockSource + ?Sized,
    C: LocalClock + ?Sized,
{
    match measure_offset(source, clock).await {
        Ok(offset) => offset,
        Err(e) => {
            tracing::warn!(
                "Clock calibration failed, keeping offset {:+}ms: {}",
                previous.offset_ms,
                e
            );
            previous
        }
    }
}

/// Detects wall-clock jumps between heartbeat ticks (sleep/resume, throttled timers)
#[derive(Debug, Clone)]
pub struct TimeJumpDetector {
    expected_interval_ms: i64,
    threshold_ms: i64,
    last_tick_ms: Option<i64>,
}

impl TimeJumpDetector {
    pub fn new(expected_interval_ms: u64, threshold_ms: u64) -> Self {
        Self {
            expected_interval_ms: expected_interval_ms as i64,
            threshold_ms: threshold_ms as i64,
            last_tick_ms: None,
        }
    }

    /// Record a heartbeat at `now_ms`. Returns the divergence from the
    /// nominal interval when it exceeds the threshold.
    pub fn tick(&mut self, now_ms: i64) -> Option<i64> {
        let previous = self.last_tick_ms.replace(now_ms)?;
        let divergence = (now_ms - previous) - self.expected_interval_ms;
        if divergence.abs() > self.threshold_ms {
            Some(divergence)
        } else {
            None
        }
    }

    /// Forget the last tick (e.g. after regaining visibility)
    pub fn reset(&mut self) {
        self.last_tick_ms = None;
    }
}

impl Default for TimeJumpDetector {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_TIME_JUMP_THRESHOLD_MS)
    }
}

/// Per-session synced clock: the local clock plus the latest offset.
///
/// Each viewing session owns its own instance; there is no process-wide
/// offset. Writers replace the offset wholesale, so the most recently
/// completed calibration wins.
#[derive(Clone)]
pub struct SessionClock {
    local: Arc<dyn LocalClock>,
    offset: Arc<RwLock<ClockOffset>>,
}

impl SessionClock {
    pub fn new(local: Arc<dyn LocalClock>) -> Self {
        Self {
            local,
            offset: Arc::new(RwLock::new(ClockOffset::default())),
        }
    }

    pub fn local(&self) -> &Arc<dyn LocalClock> {
        &self.local
    }

    pub fn offset(&self) -> ClockOffset {
        *self.offset.read()
    }

    pub fn set_offset(&self, offset: ClockOffset) {
        *self.offset.write() = offset;
    }

    pub fn local_now_ms(&self) -> i64 {
        self.local.now_ms()
    }

    /// Current best estimate of server time
    pub fn now_ms(&self) -> i64 {
        self.offset().synced_time_ms(self.local.now_ms())
    }
}

impl std::fmt::Debug for SessionClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClock")
            .field("offset", &self.offset())
            .finish()
    }
}
