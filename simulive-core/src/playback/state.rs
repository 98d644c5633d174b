//! Playback State Engine
//!
//! Pure mapping from synced wall-clock time and a stream schedule to the
//! position every viewer should be at. Nothing here holds state between
//! calls, so the result can be recomputed freely after a clock recalibration.

use crate::schedule::StreamSchedule;

/// Where a stream is in its broadcast lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Scheduled start has not arrived yet
    PreRoll,
    /// Broadcast is running
    Live,
    /// Broadcast is over (terminal)
    Ended,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreRoll => "pre-roll",
            Phase::Live => "live",
            Phase::Ended => "ended",
        }
    }
}

/// Derived playback state at one instant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    /// Elapsed time since start is in `[0, duration)`
    pub is_live: bool,
    /// Elapsed time since start is `>= duration`
    pub has_ended: bool,
    /// Position every viewer should be at, clamped to `[0, duration]`
    pub current_position: f64,
    /// Seconds until the scheduled start (0 once started)
    pub seconds_until_start: f64,
    /// Seconds left in the broadcast (0 once ended)
    pub seconds_remaining: f64,
}

impl PlaybackState {
    /// State for a given elapsed time (seconds since scheduled start).
    ///
    /// A NaN elapsed time or duration is treated as ended.
    pub fn at_elapsed(elapsed_secs: f64, video_duration_secs: f64) -> Self {
        if elapsed_secs.is_nan() || video_duration_secs.is_nan() {
            let duration = if video_duration_secs.is_finite() {
                video_duration_secs.max(0.0)
            } else {
                0.0
            };
            return Self {
                is_live: false,
                has_ended: true,
                current_position: duration,
                seconds_until_start: 0.0,
                seconds_remaining: 0.0,
            };
        }

        let duration = video_duration_secs.max(0.0);
        Self {
            is_live: elapsed_secs >= 0.0 && elapsed_secs < duration,
            has_ended: elapsed_secs >= duration,
            current_position: elapsed_secs.clamp(0.0, duration),
            seconds_until_start: (-elapsed_secs).max(0.0),
            seconds_remaining: (duration - elapsed_secs).max(0.0),
        }
    }

    pub fn phase(&self) -> Phase {
        if self.has_ended {
            Phase::Ended
        } else if self.is_live {
            Phase::Live
        } else {
            Phase::PreRoll
        }
    }

    pub fn is_pre_roll(&self) -> bool {
        self.phase() == Phase::PreRoll
    }
}

/// Seconds elapsed since the scheduled start at `synced_time_ms`
pub fn elapsed_secs(synced_time_ms: i64, schedule: &StreamSchedule) -> f64 {
    synced_time_ms.saturating_sub(schedule.scheduled_start_ms) as f64 / 1000.0
}

/// Compute the authoritative playback state at `synced_time_ms`
pub fn playback_state(synced_time_ms: i64, schedule: &StreamSchedule) -> PlaybackState {
    PlaybackState::at_elapsed(
        elapsed_secs(synced_time_ms, schedule),
        schedule.video_duration_secs,
    )
}

/// Whether the actual cursor has diverged from the expected position by
/// more than `tolerance` seconds
pub fn has_drifted(actual_position: f64, expected_position: f64, tolerance: f64) -> bool {
    (actual_position - expected_position).abs() > tolerance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::parse_scheduled_start;

    const T: i64 = 1_704_067_200_000;

    fn schedule(duration: f64) -> StreamSchedule {
        StreamSchedule::new(T, duration, 1000, 3.0).unwrap()
    }

    #[test]
    fn test_pre_roll() {
        for elapsed in [-0.001, -1.0, -60.0, -86_400.0] {
            let state = PlaybackState::at_elapsed(elapsed, 100.0);
            assert!(!state.is_live);
            assert!(!state.has_ended);
            assert_eq!(state.current_position, 0.0);
            assert_eq!(state.seconds_until_start, -elapsed);
            assert_eq!(state.phase(), Phase::PreRoll);
        }
    }

    #[test]
    fn test_live() {
        for elapsed in [0.0, 0.5, 50.0, 99.999] {
            let state = PlaybackState::at_elapsed(elapsed, 100.0);
            assert!(state.is_live);
            assert!(!state.has_ended);
            assert_eq!(state.current_position, elapsed);
            assert_eq!(state.seconds_until_start, 0.0);
            assert_eq!(state.phase(), Phase::Live);
        }
    }

    #[test]
    fn test_ended() {
        for elapsed in [100.0, 100.001, 5_000.0] {
            let state = PlaybackState::at_elapsed(elapsed, 100.0);
            assert!(state.has_ended);
            assert!(!state.is_live);
            assert_eq!(state.current_position, 100.0);
            assert_eq!(state.seconds_remaining, 0.0);
            assert_eq!(state.phase(), Phase::Ended);
        }
    }

    #[test]
    fn test_upper_bound_is_ended() {
        let state = playback_state(T + 100_000, &schedule(100.0));
        assert!(state.has_ended);
        assert!(!state.is_live);
    }

    #[test]
    fn test_idempotent() {
        let s = schedule(3600.0);
        for now in [T - 12_345, T, T + 1_800_123, T + 3_600_000, T + 9_999_999] {
            let a = playback_state(now, &s);
            let b = playback_state(now, &s);
            assert_eq!(a.current_position.to_bits(), b.current_position.to_bits());
            assert_eq!(a.seconds_until_start.to_bits(), b.seconds_until_start.to_bits());
            assert_eq!(a.seconds_remaining.to_bits(), b.seconds_remaining.to_bits());
            assert_eq!((a.is_live, a.has_ended), (b.is_live, b.has_ended));
        }
    }

    #[test]
    fn test_zero_duration_ends_at_start() {
        let s = schedule(0.0);
        assert_eq!(playback_state(T - 1, &s).phase(), Phase::PreRoll);
        assert_eq!(playback_state(T, &s).phase(), Phase::Ended);
        assert_eq!(playback_state(T + 10_000, &s).phase(), Phase::Ended);
    }

    #[test]
    fn test_nan_is_ended() {
        let state = PlaybackState::at_elapsed(f64::NAN, 100.0);
        assert!(state.has_ended);
        assert!(!state.is_live);
        assert_eq!(state.current_position, 100.0);

        let state = PlaybackState::at_elapsed(10.0, f64::NAN);
        assert!(state.has_ended);
        assert_eq!(state.current_position, 0.0);
    }

    #[test]
    fn test_extreme_times_do_not_overflow() {
        let s = schedule(100.0);
        assert_eq!(playback_state(i64::MIN, &s).phase(), Phase::PreRoll);
        assert_eq!(playback_state(i64::MAX, &s).phase(), Phase::Ended);
    }

    #[test]
    fn test_drift() {
        assert!(!has_drifted(10.0, 10.5, 3.0));
        assert!(has_drifted(10.0, 14.0, 3.0));
        assert!(has_drifted(14.0, 10.0, 3.0));
        assert!(!has_drifted(13.0, 10.0, 3.0)); // exactly at tolerance
        for x in [0.0, 1.5, 3600.0, -2.0] {
            assert!(!has_drifted(x, x, 0.0));
        }
    }

    #[test]
    fn test_one_hour_broadcast_scenarios() {
        let start = parse_scheduled_start("2024-01-01T00:00:00Z").unwrap();
        let s = StreamSchedule::new(start, 3600.0, 5000, 2.0).unwrap();

        let mid = playback_state(parse_scheduled_start("2024-01-01T00:30:00Z").unwrap(), &s);
        assert!(mid.is_live);
        assert_eq!(mid.current_position, 1800.0);
        assert_eq!(mid.seconds_remaining, 1800.0);

        let before = playback_state(parse_scheduled_start("2023-12-31T23:59:00Z").unwrap(), &s);
        assert!(!before.is_live);
        assert_eq!(before.seconds_until_start, 60.0);

        let after = playback_state(parse_scheduled_start("2024-01-01T01:00:01Z").unwrap(), &s);
        assert!(after.has_ended);
        assert_eq!(after.current_position, 3600.0);
    }
}
