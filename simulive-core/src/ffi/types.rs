//! FFI types exposed via uniffi

use crate::api::ApiError;
use crate::drift::DriftSample;
use crate::playback::{Overlay, Phase, PlaybackState as InternalPlaybackState};
use crate::schedule::{
    parse_scheduled_start, PlaybackPolicy, ScheduleError, SignedTokens, StreamRecord,
};
use crate::session::{SessionError, SyncStatus as InternalSyncStatus};

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Stream service is not reachable: {0}")]
    NotReachable(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Stream is not active: {0}")]
    StreamInactive(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Signed stream without tokens: playback must not start
    #[error("Unable to load signed video: {0}")]
    SignedVideoUnavailable(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Already watching a stream")]
    AlreadyWatching,

    #[error("No player attached")]
    NoPlayer,

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<ApiError> for CoreError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::NotReachable(msg) => CoreError::NotReachable(msg),
            ApiError::NotFound(what) => CoreError::StreamNotFound(what),
            other => CoreError::ApiError(other.to_string()),
        }
    }
}

impl From<ScheduleError> for CoreError {
    fn from(e: ScheduleError) -> Self {
        CoreError::InvalidSchedule(e.to_string())
    }
}

impl From<SessionError> for CoreError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Api(e) => e.into(),
            SessionError::Inactive(id) => CoreError::StreamInactive(id),
            SessionError::InvalidSchedule(e) => e.into(),
            e @ SessionError::SignedVideoUnavailable { .. } => {
                CoreError::SignedVideoUnavailable(e.to_string())
            }
        }
    }
}

/// Broadcast phase exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum PlaybackPhase {
    PreRoll,
    Live,
    Ended,
}

impl From<Phase> for PlaybackPhase {
    fn from(p: Phase) -> Self {
        match p {
            Phase::PreRoll => PlaybackPhase::PreRoll,
            Phase::Live => PlaybackPhase::Live,
            Phase::Ended => PlaybackPhase::Ended,
        }
    }
}

/// Overlay the UI should show on top of the player
#[derive(Debug, Clone, Copy, PartialEq, uniffi::Enum)]
pub enum OverlayState {
    Countdown { seconds_until_start: f64 },
    Hidden,
    Ended,
}

impl From<Overlay> for OverlayState {
    fn from(o: Overlay) -> Self {
        match o {
            Overlay::Countdown { seconds_until_start } => {
                OverlayState::Countdown { seconds_until_start }
            }
            Overlay::Hidden => OverlayState::Hidden,
            Overlay::Ended => OverlayState::Ended,
        }
    }
}

/// Playback state exposed via FFI
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct PlaybackSnapshot {
    pub phase: PlaybackPhase,
    pub is_live: bool,
    pub has_ended: bool,
    pub current_position: f64,
    pub seconds_until_start: f64,
    pub seconds_remaining: f64,
}

impl From<InternalPlaybackState> for PlaybackSnapshot {
    fn from(s: InternalPlaybackState) -> Self {
        Self {
            phase: s.phase().into(),
            is_live: s.is_live,
            has_ended: s.has_ended,
            current_position: s.current_position,
            seconds_until_start: s.seconds_until_start,
            seconds_remaining: s.seconds_remaining,
        }
    }
}

/// Stream metadata exposed via FFI
#[derive(Debug, Clone, uniffi::Record)]
pub struct StreamInfo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub playback_id: String,
    /// Playback requires signed tokens
    pub signed: bool,
    /// Scheduled start in ms since the UNIX epoch (None if unparseable)
    pub scheduled_start_ms: Option<i64>,
    pub duration_secs: f64,
    pub sync_interval_ms: u64,
    pub drift_tolerance_secs: f64,
    pub is_active: bool,
}

impl From<&StreamRecord> for StreamInfo {
    fn from(r: &StreamRecord) -> Self {
        Self {
            id: r.id.clone(),
            title: r.title.clone(),
            description: r.description.clone(),
            playback_id: r.playback_id.clone(),
            signed: r.playback_policy == PlaybackPolicy::Signed,
            scheduled_start_ms: parse_scheduled_start(&r.scheduled_start).ok(),
            duration_secs: r.duration,
            sync_interval_ms: r.sync_interval,
            drift_tolerance_secs: r.drift_tolerance,
            is_active: r.is_active,
        }
    }
}

/// Playback tokens for a signed stream
#[derive(Debug, Clone, uniffi::Record)]
pub struct PlaybackTokens {
    pub playback: String,
    pub thumbnail: Option<String>,
    pub storyboard: Option<String>,
    pub expires_at: Option<i64>,
}

impl From<&SignedTokens> for PlaybackTokens {
    fn from(t: &SignedTokens) -> Self {
        Self {
            playback: t.playback.clone(),
            thumbnail: t.thumbnail.clone(),
            storyboard: t.storyboard.clone(),
            expires_at: t.expires_at,
        }
    }
}

/// A drift sample for debug display
#[derive(Debug, Clone, uniffi::Record)]
pub struct DriftSampleInfo {
    pub at_ms: i64,
    /// Positive = ahead of live, negative = behind
    pub drift_secs: f64,
    pub expected_secs: f64,
    pub corrected: bool,
}

impl From<&DriftSample> for DriftSampleInfo {
    fn from(s: &DriftSample) -> Self {
        Self {
            at_ms: s.at_ms,
            drift_secs: s.drift_secs,
            expected_secs: s.expected_secs,
            corrected: s.corrected,
        }
    }
}

/// Sync status for debug display
#[derive(Debug, Clone, uniffi::Record)]
pub struct SyncStatus {
    /// Server clock minus local clock
    pub clock_offset_ms: i64,
    pub round_trip_ms: Option<u64>,
    pub phase: Option<PlaybackPhase>,
    pub last_drift_secs: Option<f64>,
    pub smoothed_drift_secs: f64,
    pub max_abs_drift_secs: f64,
    pub evaluations: u64,
    pub corrections: u64,
    pub calibration_failures: u64,
    /// Recent drift samples (newest last)
    pub sample_history: Vec<DriftSampleInfo>,
}

impl From<InternalSyncStatus> for SyncStatus {
    fn from(s: InternalSyncStatus) -> Self {
        Self {
            clock_offset_ms: s.offset.offset_ms,
            round_trip_ms: s.offset.round_trip_ms,
            phase: s.phase.map(PlaybackPhase::from),
            last_drift_secs: s.last_drift_secs,
            smoothed_drift_secs: s.smoothed_drift_secs,
            max_abs_drift_secs: s.max_abs_drift_secs,
            evaluations: s.evaluations,
            corrections: s.corrections,
            calibration_failures: s.calibration_failures,
            sample_history: s.samples.iter().map(DriftSampleInfo::from).collect(),
        }
    }
}

/// The native player the session drives
#[uniffi::export(callback_interface)]
pub trait PlayerBridge: Send + Sync {
    /// Current position in seconds
    fn position(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn seek(&self, position_secs: f64);
    fn play(&self);
    fn pause(&self);
}

/// Callback interface for viewer events
#[uniffi::export(callback_interface)]
pub trait ViewerCallback: Send + Sync {
    fn on_phase_changed(&self, phase: PlaybackPhase);
    fn on_overlay_changed(&self, overlay: OverlayState);
    /// Called after every evaluation with the expected state
    fn on_playback(&self, snapshot: PlaybackSnapshot, drift_secs: Option<f64>);
    fn on_clock_calibrated(&self, offset_ms: i64, round_trip_ms: u64);
    fn on_clock_error(&self, message: String);
    /// Broadcast over or session stopped
    fn on_finished(&self);
}
