//! Validated schedule snapshot

use chrono::DateTime;
use thiserror::Error;

use super::record::StreamRecord;

/// Schedule validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("unparsable scheduled start {0:?}")]
    InvalidStart(String),

    #[error("video duration must be a non-negative number, got {0}")]
    InvalidDuration(f64),

    #[error("sync interval must be positive")]
    ZeroSyncInterval,

    #[error("drift tolerance must be a non-negative number, got {0}")]
    InvalidDriftTolerance(f64),
}

/// Read-only schedule snapshot for one playback session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamSchedule {
    /// Instant of video position 0, in ms since the UNIX epoch
    pub scheduled_start_ms: i64,
    /// Total playable length in seconds
    pub video_duration_secs: f64,
    /// How often the driving loop re-evaluates, in ms
    pub sync_interval_ms: u64,
    /// Allowed divergence before a correction, in seconds
    pub drift_tolerance_secs: f64,
}

impl StreamSchedule {
    pub fn new(
        scheduled_start_ms: i64,
        video_duration_secs: f64,
        sync_interval_ms: u64,
        drift_tolerance_secs: f64,
    ) -> Result<Self, ScheduleError> {
        if !(video_duration_secs.is_finite() && video_duration_secs >= 0.0) {
            return Err(ScheduleError::InvalidDuration(video_duration_secs));
        }
        if sync_interval_ms == 0 {
            return Err(ScheduleError::ZeroSyncInterval);
        }
        if !(drift_tolerance_secs.is_finite() && drift_tolerance_secs >= 0.0) {
            return Err(ScheduleError::InvalidDriftTolerance(drift_tolerance_secs));
        }

        Ok(Self {
            scheduled_start_ms,
            video_duration_secs,
            sync_interval_ms,
            drift_tolerance_secs,
        })
    }
}

/// Parse an ISO-8601 / RFC 3339 instant into ms since the UNIX epoch
pub fn parse_scheduled_start(value: &str) -> Result<i64, ScheduleError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.timestamp_millis())
        .map_err(|_| ScheduleError::InvalidStart(value.to_string()))
}

impl TryFrom<&StreamRecord> for StreamSchedule {
    type Error = ScheduleError;

    fn try_from(record: &StreamRecord) -> Result<Self, Self::Error> {
        let start_ms = parse_scheduled_start(&record.scheduled_start)?;
        StreamSchedule::new(
            start_ms,
            record.duration,
            record.sync_interval,
            record.drift_tolerance,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scheduled_start() {
        assert_eq!(
            parse_scheduled_start("2024-01-01T00:00:00Z").unwrap(),
            1_704_067_200_000
        );
        assert_eq!(
            parse_scheduled_start("2024-01-01T01:00:00+01:00").unwrap(),
            1_704_067_200_000
        );
        assert!(matches!(
            parse_scheduled_start("next tuesday"),
            Err(ScheduleError::InvalidStart(_))
        ));
    }

    #[test]
    fn test_new_validates_invariants() {
        assert!(StreamSchedule::new(0, 0.0, 1, 0.0).is_ok());
        assert_eq!(
            StreamSchedule::new(0, -1.0, 1000, 1.0),
            Err(ScheduleError::InvalidDuration(-1.0))
        );
        assert!(matches!(
            StreamSchedule::new(0, f64::NAN, 1000, 1.0),
            Err(ScheduleError::InvalidDuration(_))
        ));
        assert_eq!(
            StreamSchedule::new(0, 10.0, 0, 1.0),
            Err(ScheduleError::ZeroSyncInterval)
        );
        assert_eq!(
            StreamSchedule::new(0, 10.0, 1000, -0.5),
            Err(ScheduleError::InvalidDriftTolerance(-0.5))
        );
    }
}
