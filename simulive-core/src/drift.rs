//! Drift metrics for a viewing session
//!
//! Records how far the player strayed from the live position on each
//! evaluation and how often it had to be corrected. Purely observational:
//! correction decisions are made by the driver, this only feeds status
//! displays and logs.

use crate::playback::{CursorAction, TickOutcome};

/// EMA smoothing factor (0.0-1.0)
/// Higher = more responsive to recent measurements, more variance
const EMA_ALPHA: f64 = 0.15;

/// EMA alpha for the first few samples, so the average settles quickly
const WARMUP_ALPHA: f64 = 0.4;

/// Number of samples that use the warmup alpha
const WARMUP_SAMPLES: u64 = 5;

/// Maximum number of samples to keep in history
const MAX_SAMPLE_HISTORY: usize = 10;

/// One recorded drift measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftSample {
    /// Synced time of the measurement (ms since epoch)
    pub at_ms: i64,
    /// Drift in seconds (positive = ahead of live, negative = behind)
    pub drift_secs: f64,
    /// Position the player should have been at
    pub expected_secs: f64,
    /// Whether the driver moved the cursor on this evaluation
    pub corrected: bool,
}

/// Per-session drift statistics
#[derive(Debug, Clone, Default)]
pub struct DriftTracker {
    /// Smoothed drift in seconds
    smoothed_drift_secs: f64,
    /// Largest absolute drift seen
    max_abs_drift_secs: f64,
    /// Live evaluations that produced a drift measurement
    evaluations: u64,
    /// Evaluations that moved the cursor
    corrections: u64,
    /// Recent sample history (newest last)
    sample_history: Vec<DriftSample>,
}

impl DriftTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a driver tick. Returns true if a sample was taken.
    pub fn record(&mut self, at_ms: i64, outcome: &TickOutcome) -> bool {
        let Some(drift) = outcome.drift_secs else {
            return false;
        };

        let corrected = matches!(
            outcome.action,
            Some(CursorAction::Corrected { .. }) | Some(CursorAction::SeekOverridden { .. })
        );

        self.evaluations = self.evaluations.saturating_add(1);
        if corrected {
            self.corrections = self.corrections.saturating_add(1);
        }

        let alpha = if self.evaluations <= WARMUP_SAMPLES {
            WARMUP_ALPHA
        } else {
            EMA_ALPHA
        };
        self.smoothed_drift_secs = if self.evaluations == 1 {
            drift
        } else {
            alpha * drift + (1.0 - alpha) * self.smoothed_drift_secs
        };
        self.max_abs_drift_secs = self.max_abs_drift_secs.max(drift.abs());

        self.record_sample(DriftSample {
            at_ms,
            drift_secs: drift,
            expected_secs: outcome.state.current_position,
            corrected,
        });

        tracing::debug!(
            "Drift {:+.3}s (smoothed {:+.3}s, corrected={})",
            drift,
            self.smoothed_drift_secs,
            corrected
        );

        true
    }

    fn record_sample(&mut self, sample: DriftSample) {
        self.sample_history.push(sample);
        if self.sample_history.len() > MAX_SAMPLE_HISTORY {
            self.sample_history.remove(0);
        }
    }

    pub fn smoothed_drift_secs(&self) -> f64 {
        self.smoothed_drift_secs
    }

    pub fn max_abs_drift_secs(&self) -> f64 {
        self.max_abs_drift_secs
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    /// Latest drift measurement, if any
    pub fn last_drift_secs(&self) -> Option<f64> {
        self.sample_history.last().map(|s| s.drift_secs)
    }

    /// Recent samples (newest last)
    pub fn sample_history(&self) -> &[DriftSample] {
        &self.sample_history
    }
}
