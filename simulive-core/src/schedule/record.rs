//! Stream API Records

use serde::{Deserialize, Serialize};

use super::snapshot::{ScheduleError, StreamSchedule};

/// Default re-sync interval when a record does not specify one (ms)
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 5_000;

/// Default drift tolerance when a record does not specify one (seconds)
pub const DEFAULT_DRIFT_TOLERANCE_SECS: f64 = 2.0;

/// Access policy for a stream's video asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPolicy {
    /// Playable with the bare playback ID
    #[default]
    Public,
    /// Requires tokens issued for the playback ID
    Signed,
}

impl PlaybackPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackPolicy::Public => "public",
            PlaybackPolicy::Signed => "signed",
        }
    }

    pub fn requires_tokens(&self) -> bool {
        matches!(self, PlaybackPolicy::Signed)
    }
}

/// A scheduled stream as served by the stream API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    /// Stream identifier
    pub id: String,

    /// Display title
    pub title: String,

    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Opaque asset reference this stream was created from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,

    /// Playable stream handle
    pub playback_id: String,

    /// Whether playback needs signed tokens
    #[serde(default)]
    pub playback_policy: PlaybackPolicy,

    /// ISO-8601 instant at which video position 0 occurs
    pub scheduled_start: String,

    /// Video duration in seconds
    pub duration: f64,

    /// Re-sync interval in milliseconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    /// Allowed drift before a correction, in seconds
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: f64,

    /// Whether the stream can be watched at all
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_MS
}

fn default_drift_tolerance() -> f64 {
    DEFAULT_DRIFT_TOLERANCE_SECS
}

fn default_active() -> bool {
    true
}

impl StreamRecord {
    /// Check the record's schedule fields.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.id.trim().is_empty() {
            return Err(ScheduleError::MissingField("id"));
        }
        if self.playback_id.trim().is_empty() {
            return Err(ScheduleError::MissingField("playbackId"));
        }
        StreamSchedule::try_from(self).map(|_| ())
    }

    /// Validated schedule snapshot for this record
    pub fn schedule(&self) -> Result<StreamSchedule, ScheduleError> {
        StreamSchedule::try_from(self)
    }
}

/// Response body of the clock endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    /// Milliseconds since the UNIX epoch
    pub server_time: i64,
}

/// Tokens needed to play a signed asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTokens {
    pub playback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storyboard: Option<String>,
    /// Expiry in milliseconds since the UNIX epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}
