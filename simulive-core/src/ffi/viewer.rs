//! Viewer implementation for FFI

use std::sync::{Arc, Once};

use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::StreamClient;
use crate::clock::{CalibrationTrigger, ClockError, ClockOffset, SystemClock};
use crate::config::SyncConfig;
use crate::playback::{Overlay, Phase, PlaybackState, PlayerCursor, TickOutcome};
use crate::schedule::parse_scheduled_start;
use crate::session::{prepare_stream, SessionObserver, ViewerSession};

use super::types::*;

static TRACING_INIT: Once = Once::new();

const DEFAULT_LOG_FILTER: &str = "simulive_core=debug,hyper_util=off,reqwest=off,hyper=off";

/// Initialize tracing once for the host process
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_ansi(false) // Xcode / logcat consoles
            .with_target(false)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}

/// Adapts the native player to the driver's cursor interface
struct BridgeCursor(Arc<dyn PlayerBridge>);

impl PlayerCursor for BridgeCursor {
    fn position(&self) -> f64 {
        self.0.position()
    }

    fn is_paused(&self) -> bool {
        self.0.is_paused()
    }

    fn seek(&self, position_secs: f64) {
        self.0.seek(position_secs);
    }

    fn play(&self) {
        self.0.play();
    }

    fn pause(&self) {
        self.0.pause();
    }
}

/// Forwards session events to the native callback, if one is set
struct CallbackObserver {
    callback: Option<Arc<dyn ViewerCallback>>,
}

impl SessionObserver for CallbackObserver {
    fn on_phase_changed(&self, _from: Option<Phase>, to: Phase) {
        if let Some(cb) = &self.callback {
            cb.on_phase_changed(to.into());
        }
    }

    fn on_overlay(&self, overlay: Overlay) {
        if let Some(cb) = &self.callback {
            cb.on_overlay_changed(overlay.into());
        }
    }

    fn on_tick(&self, outcome: &TickOutcome) {
        if let Some(cb) = &self.callback {
            cb.on_playback(outcome.state.into(), outcome.drift_secs);
        }
    }

    fn on_calibrated(&self, _trigger: CalibrationTrigger, offset: ClockOffset) {
        if let Some(cb) = &self.callback {
            cb.on_clock_calibrated(offset.offset_ms, offset.round_trip_ms.unwrap_or_default());
        }
    }

    fn on_calibration_failed(&self, trigger: CalibrationTrigger, error: &ClockError) {
        if let Some(cb) = &self.callback {
            cb.on_clock_error(format!("{} calibration failed: {}", trigger.as_str(), error));
        }
    }

    fn on_finished(&self) {
        if let Some(cb) = &self.callback {
            cb.on_finished();
        }
    }
}

/// Main viewer interface: watches one stream at a time
#[derive(uniffi::Object)]
pub struct Viewer {
    runtime: Runtime,
    client: StreamClient,
    config: SyncConfig,
    player: RwLock<Option<Arc<dyn PlayerBridge>>>,
    callback: RwLock<Option<Arc<dyn ViewerCallback>>>,
    session: RwLock<Option<ViewerSession>>,
}

#[uniffi::export]
impl Viewer {
    /// Create a viewer for the stream service at `base_url`
    #[uniffi::constructor]
    pub fn new(base_url: String) -> Result<Self, CoreError> {
        init_tracing();
        info!("Initializing simulive viewer for {}", base_url);

        let config = SyncConfig::from_env();
        let runtime = Runtime::new().map_err(|e| CoreError::Runtime(e.to_string()))?;
        let client = StreamClient::with_timeout(base_url, config.request_timeout())?;

        Ok(Self {
            runtime,
            client,
            config,
            player: RwLock::new(None),
            callback: RwLock::new(None),
            session: RwLock::new(None),
        })
    }

    /// Attach the native player. Takes effect on the next `watch`.
    pub fn set_player(&self, player: Box<dyn PlayerBridge>) {
        *self.player.write() = Some(Arc::from(player));
    }

    /// Set the event callback. Takes effect on the next `watch`.
    pub fn set_callback(&self, callback: Box<dyn ViewerCallback>) {
        *self.callback.write() = Some(Arc::from(callback));
    }

    /// Streams currently listed by the service
    pub fn list_streams(&self) -> Result<Vec<StreamInfo>, CoreError> {
        let records = self.runtime.block_on(self.client.streams())?;
        Ok(records.iter().map(StreamInfo::from).collect())
    }

    /// Resolve `stream_id` and start driving the attached player
    pub fn watch(&self, stream_id: String) -> Result<StreamInfo, CoreError> {
        if self.is_watching() {
            return Err(CoreError::AlreadyWatching);
        }
        let player = self.player.read().clone().ok_or(CoreError::NoPlayer)?;

        let prepared = self.runtime.block_on(prepare_stream(&self.client, &stream_id));
        let prepared = match prepared {
            Ok(p) => p,
            Err(e) => {
                warn!("Cannot watch {}: {}", stream_id, e);
                return Err(e.into());
            }
        };
        let info = StreamInfo::from(&prepared.record);

        let observer = CallbackObserver {
            callback: self.callback.read().clone(),
        };
        let session = ViewerSession::spawn(
            self.runtime.handle(),
            prepared,
            Arc::new(self.client.clone()),
            Arc::new(SystemClock),
            Arc::new(BridgeCursor(player)),
            Arc::new(observer),
            &self.config,
        );

        *self.session.write() = Some(session);
        info!("Watching {} ({})", info.id, info.title);
        Ok(info)
    }

    /// Stop watching. No-op when nothing is being watched.
    pub fn stop(&self) {
        if let Some(mut session) = self.session.write().take() {
            session.stop();
            debug!("Viewer session dropped");
        }
    }

    /// Whether a session is running (an ended broadcast counts as not watching)
    pub fn is_watching(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| !s.is_finished())
    }

    /// Playback tokens of the current signed stream
    pub fn playback_tokens(&self) -> Option<PlaybackTokens> {
        let session = self.session.read();
        session
            .as_ref()
            .and_then(|s| s.stream().tokens.as_ref())
            .map(PlaybackTokens::from)
    }

    /// The app returned to the foreground
    pub fn on_visibility_regained(&self) {
        if let Some(s) = self.session.read().as_ref() {
            s.visibility_regained();
        }
    }

    /// The player reported a seek
    pub fn on_player_seeked(&self, position_secs: f64) {
        if let Some(s) = self.session.read().as_ref() {
            s.player_seeked(position_secs);
        }
    }

    /// The player reported a pause
    pub fn on_player_paused(&self) {
        if let Some(s) = self.session.read().as_ref() {
            s.player_paused();
        }
    }

    /// Force a clock calibration
    pub fn recalibrate(&self) {
        if let Some(s) = self.session.read().as_ref() {
            s.recalibrate();
        }
    }

    pub fn sync_status(&self) -> Option<SyncStatus> {
        self.session
            .read()
            .as_ref()
            .map(|s| SyncStatus::from(s.sync_status()))
    }

    /// Expected playback state right now
    pub fn current_state(&self) -> Option<PlaybackSnapshot> {
        self.session
            .read()
            .as_ref()
            .map(|s| PlaybackSnapshot::from(s.current_state()))
    }
}

/// Playback state for a synced time and a schedule, without a session
#[uniffi::export]
pub fn compute_playback_state(
    synced_time_ms: i64,
    scheduled_start_ms: i64,
    video_duration_secs: f64,
) -> PlaybackSnapshot {
    let elapsed = synced_time_ms.saturating_sub(scheduled_start_ms) as f64 / 1000.0;
    PlaybackState::at_elapsed(elapsed, video_duration_secs).into()
}

/// Whether `actual` is further than `tolerance_secs` from `expected`
#[uniffi::export]
pub fn check_drift(actual_position: f64, expected_position: f64, tolerance_secs: f64) -> bool {
    crate::playback::has_drifted(actual_position, expected_position, tolerance_secs)
}

/// Parse an ISO-8601 start time into ms since the UNIX epoch
#[uniffi::export]
pub fn parse_start_time(value: String) -> Result<i64, CoreError> {
    Ok(parse_scheduled_start(&value)?)
}
