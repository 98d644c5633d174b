//! Client-side sync configuration
//!
//! Timer intervals for a viewing session. Per-stream parameters (sync
//! interval, drift tolerance) come from the stream record, not from here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_RECALIBRATION_INTERVAL_MS,
    DEFAULT_TIME_JUMP_THRESHOLD_MS,
};
use crate::playback::DEFAULT_RESUME_SETTLE_DELAY_MS;

/// Timer configuration for a viewing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Safety-net recalibration interval
    pub recalibration_interval_ms: u64,
    /// Nominal heartbeat interval for time-jump detection
    pub heartbeat_interval_ms: u64,
    /// Heartbeat divergence that triggers a recalibration
    pub time_jump_threshold_ms: u64,
    /// Countdown overlay refresh interval
    pub countdown_tick_ms: u64,
    /// Delay before undoing a pause while live
    pub resume_settle_delay_ms: u64,
    /// HTTP request timeout for the stream/clock API
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            recalibration_interval_ms: DEFAULT_RECALIBRATION_INTERVAL_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            time_jump_threshold_ms: DEFAULT_TIME_JUMP_THRESHOLD_MS,
            countdown_tick_ms: 1_000,
            resume_settle_delay_ms: DEFAULT_RESUME_SETTLE_DELAY_MS,
            request_timeout_ms: 5_000,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `SIMULIVE_*` environment variables
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str, current: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(current)
        };

        self.recalibration_interval_ms =
            read("SIMULIVE_RECALIBRATION_INTERVAL_MS", self.recalibration_interval_ms);
        self.heartbeat_interval_ms = read("SIMULIVE_HEARTBEAT_INTERVAL_MS", self.heartbeat_interval_ms);
        self.time_jump_threshold_ms =
            read("SIMULIVE_TIME_JUMP_THRESHOLD_MS", self.time_jump_threshold_ms);
        self.countdown_tick_ms = read("SIMULIVE_COUNTDOWN_TICK_MS", self.countdown_tick_ms);
        self.resume_settle_delay_ms =
            read("SIMULIVE_RESUME_SETTLE_DELAY_MS", self.resume_settle_delay_ms);
        self.request_timeout_ms = read("SIMULIVE_REQUEST_TIMEOUT_MS", self.request_timeout_ms);
        self
    }

    pub fn recalibration_interval(&self) -> Duration {
        Duration::from_millis(self.recalibration_interval_ms.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}
