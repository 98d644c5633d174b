//! Viewing session runtime
//!
//! Resolves a stream, then runs the driving loop for one viewer: periodic
//! re-evaluation and drift correction, countdown updates, clock
//! recalibration on an interval, on visibility regain and on detected time
//! jumps. All timers live in a single task that is torn down with the
//! session.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::{ApiError, StreamCatalog};
use crate::clock::{
    measure_offset, CalibrationTrigger, ClockError, ClockOffset, ClockSource, LocalClock,
    SessionClock, TimeJumpDetector,
};
use crate::config::SyncConfig;
use crate::drift::{DriftSample, DriftTracker};
use crate::playback::{
    Overlay, Phase, PlaybackState, PlayerCursor, SyncDriver, TickOutcome,
};
use crate::schedule::{ScheduleError, SignedTokens, StreamRecord, StreamSchedule};

/// Errors that prevent a session from starting
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("stream {0} is not active")]
    Inactive(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] ScheduleError),

    #[error("unable to load signed video {playback_id}: {reason}")]
    SignedVideoUnavailable { playback_id: String, reason: String },
}

/// A stream that is ready to be watched
#[derive(Debug, Clone)]
pub struct PreparedStream {
    pub record: StreamRecord,
    pub schedule: StreamSchedule,
    /// Present only for signed streams
    pub tokens: Option<SignedTokens>,
}

/// Look up a stream and everything needed before playback may start.
///
/// Signed streams must obtain tokens here; playback never starts without them.
pub async fn prepare_stream<C>(catalog: &C, stream_id: &str) -> Result<PreparedStream, SessionError>
where
    C: StreamCatalog + ?Sized,
{
    let record = catalog.stream(stream_id).await?;
    if !record.is_active {
        return Err(SessionError::Inactive(record.id));
    }

    let schedule = record.schedule()?;

    let tokens = if record.playback_policy.requires_tokens() {
        match catalog.signed_tokens(&record.playback_id).await {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!("Token issuance failed for {}: {}", record.playback_id, e);
                return Err(SessionError::SignedVideoUnavailable {
                    playback_id: record.playback_id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    } else {
        None
    };

    debug!(
        "Prepared stream {} (start={}ms, duration={}s, policy={})",
        record.id,
        schedule.scheduled_start_ms,
        schedule.video_duration_secs,
        record.playback_policy.as_str()
    );

    Ok(PreparedStream {
        record,
        schedule,
        tokens,
    })
}

/// Receives session events. Every method defaults to a no-op.
pub trait SessionObserver: Send + Sync {
    fn on_phase_changed(&self, _from: Option<Phase>, _to: Phase) {}
    fn on_overlay(&self, _overlay: Overlay) {}
    fn on_tick(&self, _outcome: &TickOutcome) {}
    fn on_calibrated(&self, _trigger: CalibrationTrigger, _offset: ClockOffset) {}
    fn on_calibration_failed(&self, _trigger: CalibrationTrigger, _error: &ClockError) {}
    /// The loop has exited (broadcast ended or session stopped)
    fn on_finished(&self) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Snapshot of a session's sync health
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub offset: ClockOffset,
    pub phase: Option<Phase>,
    pub last_drift_secs: Option<f64>,
    pub smoothed_drift_secs: f64,
    pub max_abs_drift_secs: f64,
    pub evaluations: u64,
    pub corrections: u64,
    pub calibration_failures: u64,
    pub samples: Vec<DriftSample>,
}

/// Things the viewer's environment reports to the loop
#[derive(Debug, Clone, Copy)]
enum ViewerEvent {
    VisibilityRegained,
    Seeked(f64),
    Paused,
    Recalibrate,
}

/// State written by the loop and read by the session handle
#[derive(Debug, Default)]
struct SessionShared {
    phase: Option<Phase>,
    drift: DriftTracker,
    calibration_failures: u64,
}

type CalibrationResult = (CalibrationTrigger, Result<ClockOffset, ClockError>);

/// Handle to a running viewing session
pub struct ViewerSession {
    stream: PreparedStream,
    clock: SessionClock,
    shared: Arc<RwLock<SessionShared>>,
    events: mpsc::UnboundedSender<ViewerEvent>,
    cancel: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ViewerSession {
    /// Start the driving loop for `stream` on `handle`
    pub fn spawn(
        handle: &Handle,
        stream: PreparedStream,
        clock_source: Arc<dyn ClockSource>,
        local_clock: Arc<dyn LocalClock>,
        player: Arc<dyn PlayerCursor>,
        observer: Arc<dyn SessionObserver>,
        config: &SyncConfig,
    ) -> Self {
        let clock = SessionClock::new(local_clock);
        let shared = Arc::new(RwLock::new(SessionShared::default()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();

        let session_loop = SessionLoop {
            driver: SyncDriver::new(stream.schedule, config.resume_settle_delay_ms),
            detector: TimeJumpDetector::new(
                config.heartbeat_interval_ms,
                config.time_jump_threshold_ms,
            ),
            clock: clock.clone(),
            source: clock_source,
            player,
            observer,
            shared: Arc::clone(&shared),
            config: config.clone(),
            calibrations: JoinSet::new(),
            clock_settled: false,
        };

        let task = handle.spawn(session_loop.run(events_rx, cancel_rx));
        info!("Viewer session started for stream {}", stream.record.id);

        Self {
            stream,
            clock,
            shared,
            events: events_tx,
            cancel: Some(cancel_tx),
            task,
        }
    }

    pub fn stream(&self) -> &PreparedStream {
        &self.stream
    }

    pub fn clock_offset(&self) -> ClockOffset {
        self.clock.offset()
    }

    /// Best estimate of current server time
    pub fn synced_now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Authoritative playback state right now
    pub fn current_state(&self) -> PlaybackState {
        crate::playback::playback_state(self.clock.now_ms(), &self.stream.schedule)
    }

    /// The app came back to the foreground
    pub fn visibility_regained(&self) {
        self.send(ViewerEvent::VisibilityRegained);
    }

    /// The player reported a seek (viewer-initiated or not)
    pub fn player_seeked(&self, position_secs: f64) {
        self.send(ViewerEvent::Seeked(position_secs));
    }

    /// The player reported a pause
    pub fn player_paused(&self) {
        self.send(ViewerEvent::Paused);
    }

    /// Force a calibration now
    pub fn recalibrate(&self) {
        self.send(ViewerEvent::Recalibrate);
    }

    fn send(&self, event: ViewerEvent) {
        if self.events.send(event).is_err() {
            debug!("Session loop gone, dropping {:?}", event);
        }
    }

    pub fn sync_status(&self) -> SyncStatus {
        let shared = self.shared.read();
        SyncStatus {
            offset: self.clock.offset(),
            phase: shared.phase,
            last_drift_secs: shared.drift.last_drift_secs(),
            smoothed_drift_secs: shared.drift.smoothed_drift_secs(),
            max_abs_drift_secs: shared.drift.max_abs_drift_secs(),
            evaluations: shared.drift.evaluations(),
            corrections: shared.drift.corrections(),
            calibration_failures: shared.calibration_failures,
            samples: shared.drift.sample_history().to_vec(),
        }
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and all of its timers
    pub fn stop(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
            info!("Viewer session for {} stopping", self.stream.record.id);
        }
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.stop();
        self.task.abort();
    }
}

impl std::fmt::Debug for ViewerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession")
            .field("stream", &self.stream.record.id)
            .field("clock", &self.clock)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// The driving loop. Owns the driver; nothing else mutates it.
struct SessionLoop {
    driver: SyncDriver,
    detector: TimeJumpDetector,
    clock: SessionClock,
    source: Arc<dyn ClockSource>,
    player: Arc<dyn PlayerCursor>,
    observer: Arc<dyn SessionObserver>,
    shared: Arc<RwLock<SessionShared>>,
    config: SyncConfig,
    calibrations: JoinSet<CalibrationResult>,
    /// The initial calibration has resolved, successfully or not
    clock_settled: bool,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ViewerEvent>,
        mut cancel: oneshot::Receiver<()>,
    ) {
        debug!("Session loop started");
        self.calibrate(CalibrationTrigger::Initial);

        let sync_every = Duration::from_millis(self.driver.schedule().sync_interval_ms.max(1));
        let mut sync_tick = interval(sync_every);
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut countdown = interval(self.config.countdown_tick());
        countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let recal_every = self.config.recalibration_interval();
        let mut recalibrate = interval_at(Instant::now() + recal_every, recal_every);
        recalibrate.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut heartbeat = interval(self.config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut resume_at: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = &mut cancel => {
                    debug!("Session loop cancelled");
                    break;
                }

                _ = sync_tick.tick() => self.tick(),

                _ = countdown.tick() => self.countdown(),

                _ = recalibrate.tick() => self.calibrate(CalibrationTrigger::Interval),

                _ = heartbeat.tick() => {
                    if let Some(divergence) = self.detector.tick(self.clock.local_now_ms()) {
                        warn!("Heartbeat off by {:+}ms, clock may have jumped", divergence);
                        self.calibrate(CalibrationTrigger::TimeJump);
                    }
                }

                event = events.recv() => match event {
                    Some(ViewerEvent::VisibilityRegained) => {
                        self.detector.reset();
                        self.calibrate(CalibrationTrigger::VisibilityRegained);
                        self.tick();
                    }
                    Some(ViewerEvent::Seeked(position)) => {
                        self.driver.notify_seeked(position, self.clock.now_ms());
                        self.tick();
                    }
                    Some(ViewerEvent::Paused) => {
                        let now = self.clock.now_ms();
                        self.driver.notify_paused(now);
                        if let Some(due) = self.driver.resume_due_at() {
                            let wait = Duration::from_millis(due.saturating_sub(now).max(0) as u64);
                            resume_at = Some(Instant::now() + wait);
                        }
                    }
                    Some(ViewerEvent::Recalibrate) => self.calibrate(CalibrationTrigger::Manual),
                    None => {
                        debug!("Session handle dropped");
                        break;
                    }
                },

                _ = sleep_until(resume_at.unwrap_or_else(Instant::now)), if resume_at.is_some() => {
                    resume_at = None;
                    self.tick();
                }

                Some(joined) = self.calibrations.join_next(), if !self.calibrations.is_empty() => {
                    self.apply_calibration(joined);
                }
            }

            if self.driver.has_ended() {
                info!("Broadcast ended, session loop finishing");
                break;
            }
        }

        self.calibrations.abort_all();
        self.observer.on_finished();
        debug!("Session loop ended");
    }

    /// Evaluate and correct the player.
    ///
    /// ENDED is terminal, so it is only entered once the initial
    /// calibration has resolved; an uncalibrated local clock running ahead
    /// of the server would otherwise end a broadcast that is still live.
    fn tick(&mut self) {
        let now = self.clock.now_ms();
        if !self.clock_settled && self.driver.evaluate(now).has_ended {
            debug!("Holding off on ENDED until the clock is calibrated");
            return;
        }
        let outcome = self.driver.tick(now, self.player.as_ref());

        {
            let mut shared = self.shared.write();
            shared.phase = Some(outcome.phase);
            shared.drift.record(now, &outcome);
        }

        if let Some(action) = outcome.action {
            debug!("Cursor action: {:?}", action);
        }
        if let Some((from, to)) = outcome.transition {
            self.observer.on_phase_changed(from, to);
            self.observer.on_overlay(outcome.overlay);
        }
        self.observer.on_tick(&outcome);
    }

    /// Refresh the countdown, and catch boundary crossings between sync ticks
    fn countdown(&mut self) {
        let state = self.driver.evaluate(self.clock.now_ms());
        if self.driver.phase() != Some(state.phase()) {
            self.tick();
        } else if state.is_pre_roll() {
            self.observer.on_overlay(Overlay::for_state(&state));
        }
    }

    /// Start a calibration round trip without waiting for it
    fn calibrate(&mut self, trigger: CalibrationTrigger) {
        let source = Arc::clone(&self.source);
        let local = Arc::clone(self.clock.local());
        debug!("Starting {} calibration", trigger.as_str());

        self.calibrations.spawn(async move {
            let result = measure_offset(source.as_ref(), local.as_ref()).await;
            (trigger, result)
        });
    }

    /// Apply a finished calibration. Completion order decides: the most
    /// recently completed round trip wins.
    fn apply_calibration(&mut self, joined: Result<CalibrationResult, JoinError>) {
        let first_attempt = !self.clock_settled;
        if !matches!(&joined, Err(e) if e.is_cancelled()) {
            self.clock_settled = true;
        }

        match joined {
            Ok((trigger, Ok(offset))) => {
                let previous = self.clock.offset();
                self.clock.set_offset(offset);
                info!(
                    "Clock offset {:+}ms -> {:+}ms ({}, rtt={}ms)",
                    previous.offset_ms,
                    offset.offset_ms,
                    trigger.as_str(),
                    offset.round_trip_ms.unwrap_or_default()
                );
                self.observer.on_calibrated(trigger, offset);

                // First real offset: re-evaluate now instead of on the next tick
                if first_attempt || !previous.is_calibrated() {
                    self.tick();
                }
            }
            Ok((trigger, Err(e))) => {
                warn!(
                    "{} calibration failed, keeping offset {:+}ms: {}",
                    trigger.as_str(),
                    self.clock.offset().offset_ms,
                    e
                );
                self.shared.write().calibration_failures += 1;
                self.observer.on_calibration_failed(trigger, &e);

                // Failing open: whatever was held back waits on nothing now
                if first_attempt {
                    self.tick();
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                warn!("Calibration task failed: {}", e);
                if first_attempt {
                    self.tick();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::{Command, FakePlayer};
    use crate::schedule::PlaybackPolicy;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    const BASE_MS: i64 = 1_704_067_200_000;

    /// Wall clock that follows tokio's (pausable) clock
    struct TokioClock {
        base_ms: i64,
        start: Instant,
    }

    impl TokioClock {
        fn new(base_ms: i64) -> Self {
            Self {
                base_ms,
                start: Instant::now(),
            }
        }
    }

    impl LocalClock for TokioClock {
        fn now_ms(&self) -> i64 {
            self.base_ms + self.start.elapsed().as_millis() as i64
        }
    }

    /// Server running `skew_ms` ahead of the local clock
    struct SkewedServer {
        clock: Arc<TokioClock>,
        skew_ms: AtomicI64,
        calls: AtomicUsize,
        down: bool,
        /// Round trip, split evenly around the server reading
        round_trip_ms: u64,
    }

    impl SkewedServer {
        fn new(clock: Arc<TokioClock>, skew_ms: i64) -> Self {
            Self {
                clock,
                skew_ms: AtomicI64::new(skew_ms),
                calls: AtomicUsize::new(0),
                down: false,
                round_trip_ms: 0,
            }
        }

        fn with_round_trip(mut self, round_trip_ms: u64) -> Self {
            self.round_trip_ms = round_trip_ms;
            self
        }

        fn down(clock: Arc<TokioClock>) -> Self {
            Self {
                down: true,
                ..Self::new(clock, 0)
            }
        }
    }

    #[async_trait]
    impl ClockSource for SkewedServer {
        async fn server_time_ms(&self) -> Result<i64, ClockError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down {
                return Err(ClockError::Unreachable("connection refused".to_string()));
            }
            let half = Duration::from_millis(self.round_trip_ms / 2);
            if !half.is_zero() {
                tokio::time::sleep(half).await;
            }
            let server = self.clock.now_ms() + self.skew_ms.load(Ordering::SeqCst);
            if !half.is_zero() {
                tokio::time::sleep(half).await;
            }
            Ok(server)
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        transitions: Mutex<Vec<(Option<Phase>, Phase)>>,
        calibrations: AtomicUsize,
        failures: AtomicUsize,
        countdowns: AtomicUsize,
        finished: AtomicUsize,
    }

    impl SessionObserver for RecordingObserver {
        fn on_phase_changed(&self, from: Option<Phase>, to: Phase) {
            self.transitions.lock().push((from, to));
        }

        fn on_overlay(&self, overlay: Overlay) {
            if matches!(overlay, Overlay::Countdown { .. }) {
                self.countdowns.fetch_add(1, Ordering::SeqCst);
            }
        }

        fn on_calibrated(&self, _trigger: CalibrationTrigger, _offset: ClockOffset) {
            self.calibrations.fetch_add(1, Ordering::SeqCst);
        }

        fn on_calibration_failed(&self, _trigger: CalibrationTrigger, _error: &ClockError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }

        fn on_finished(&self) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn record(policy: PlaybackPolicy, active: bool) -> StreamRecord {
        StreamRecord {
            id: "launch".to_string(),
            title: "Launch".to_string(),
            description: None,
            asset_id: None,
            playback_id: "pb-1".to_string(),
            playback_policy: policy,
            scheduled_start: "2024-01-01T00:00:00Z".to_string(),
            duration: 3600.0,
            sync_interval: 1000,
            drift_tolerance: 2.0,
            is_active: active,
        }
    }

    fn prepared(start_offset_ms: i64, duration: f64) -> PreparedStream {
        PreparedStream {
            record: record(PlaybackPolicy::Public, true),
            schedule: StreamSchedule::new(BASE_MS + start_offset_ms, duration, 1_000, 2.0)
                .unwrap(),
            tokens: None,
        }
    }

    /// Start a session whose clock server is `skew_ms` ahead of the local clock
    fn start_skewed(stream: PreparedStream, skew_ms: i64, round_trip_ms: u64) -> Harness {
        let local = Arc::new(TokioClock::new(BASE_MS));
        let server = SkewedServer::new(local, skew_ms).with_round_trip(round_trip_ms);
        start(stream, Some(server))
    }

    struct Harness {
        session: ViewerSession,
        server: Arc<SkewedServer>,
        player: Arc<FakePlayer>,
        observer: Arc<RecordingObserver>,
    }

    fn start(stream: PreparedStream, server: Option<SkewedServer>) -> Harness {
        let local = Arc::new(TokioClock::new(BASE_MS));
        let server = Arc::new(server.unwrap_or_else(|| SkewedServer::new(Arc::clone(&local), 0)));
        let player = Arc::new(FakePlayer::paused_at(0.0));
        let observer = Arc::new(RecordingObserver::default());

        let session = ViewerSession::spawn(
            &Handle::current(),
            stream,
            server.clone(),
            local,
            player.clone(),
            observer.clone(),
            &SyncConfig::default(),
        );

        Harness {
            session,
            server,
            player,
            observer,
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_follows_schedule_to_the_end() {
        let h = start(prepared(3_000, 10.0), None);

        advance(500).await;
        assert_eq!(h.session.sync_status().phase, Some(Phase::PreRoll));
        assert_eq!(h.player.take_commands(), vec![Command::Seek(0.0), Command::Pause]);
        assert!(h.observer.countdowns.load(Ordering::SeqCst) >= 1);

        advance(3_000).await;
        assert_eq!(h.session.sync_status().phase, Some(Phase::Live));
        let commands = h.player.take_commands();
        assert_eq!(&commands[..2], &[Command::Seek(0.0), Command::Play]);

        advance(10_000).await;
        assert!(h.session.is_finished());
        let commands = h.player.take_commands();
        assert_eq!(
            &commands[commands.len() - 2..],
            &[Command::Seek(10.0), Command::Pause]
        );
        assert_eq!(
            *h.observer.transitions.lock(),
            vec![
                (None, Phase::PreRoll),
                (Some(Phase::PreRoll), Phase::Live),
                (Some(Phase::Live), Phase::Ended),
            ]
        );
        assert_eq!(h.observer.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_player_is_corrected() {
        let h = start(prepared(-60_000, 3600.0), None);

        advance(100).await;
        assert_eq!(h.player.take_commands(), vec![Command::Seek(60.0), Command::Play]);

        // The fake player never advances on its own, so it falls behind
        advance(5_000).await;
        let status = h.session.sync_status();
        assert!(status.corrections >= 1, "{:?}", status);
        assert!(h
            .player
            .take_commands()
            .iter()
            .any(|c| matches!(c, Command::Seek(p) if *p > 60.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_applies_server_offset() {
        let local = Arc::new(TokioClock::new(BASE_MS));
        let server = SkewedServer::new(Arc::clone(&local), 5_000);
        let h = start(prepared(-60_000, 3600.0), Some(server));

        advance(10).await;
        assert_eq!(h.session.clock_offset().offset_ms, 5_000);
        assert_eq!(h.server.calls.load(Ordering::SeqCst), 1);

        // Visibility regain triggers another round trip
        h.server.skew_ms.store(7_000, Ordering::SeqCst);
        h.session.visibility_regained();
        advance(10).await;
        assert_eq!(h.server.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.session.clock_offset().offset_ms, 7_000);

        // And so does the safety-net interval
        advance(60_000).await;
        assert!(h.server.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(h.observer.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_clock_ahead_does_not_end_live_stream() {
        // Local clock is ten minutes ahead: by local time the 300s
        // broadcast ended long ago, by server time it is 100s in
        let h = start_skewed(prepared(-700_000, 300.0), -600_000, 50);

        advance(10).await;
        assert_eq!(h.session.sync_status().phase, None);
        assert!(!h.session.is_finished());
        assert!(h.player.take_commands().is_empty());

        advance(100).await;
        assert_eq!(h.session.clock_offset().offset_ms, -600_000);
        assert_eq!(h.session.sync_status().phase, Some(Phase::Live));
        assert!(!h.session.is_finished());
        assert_eq!(*h.observer.transitions.lock(), vec![(None, Phase::Live)]);

        let commands = h.player.take_commands();
        match commands.as_slice() {
            [Command::Seek(p), Command::Play] => assert!((p - 100.05).abs() < 0.01, "seeked to {}", p),
            other => panic!("unexpected commands {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_clock_still_ends_after_failed_calibration() {
        let local = Arc::new(TokioClock::new(BASE_MS));
        let server = SkewedServer::down(Arc::clone(&local));
        let h = start(prepared(-700_000, 300.0), Some(server));

        // Nothing better than the local clock will arrive: fail open
        advance(10).await;
        assert!(h.session.is_finished());
        assert_eq!(h.player.take_commands(), vec![Command::Seek(300.0), Command::Pause]);
        assert_eq!(h.observer.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_calibration_moves_pre_roll_straight_to_ended() {
        // Local clock a minute behind: looks like pre-roll until the
        // server says the 10s broadcast is already over
        let h = start_skewed(prepared(5_000, 10.0), 60_000, 50);

        advance(10).await;
        assert_eq!(h.session.sync_status().phase, Some(Phase::PreRoll));
        assert_eq!(h.player.take_commands(), vec![Command::Seek(0.0), Command::Pause]);

        advance(100).await;
        assert_eq!(h.session.clock_offset().offset_ms, 60_000);
        assert!(h.session.is_finished());
        assert_eq!(h.player.take_commands(), vec![Command::Seek(10.0), Command::Pause]);
        assert_eq!(
            *h.observer.transitions.lock(),
            vec![(None, Phase::PreRoll), (Some(Phase::PreRoll), Phase::Ended)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_recalibration_mid_broadcast_can_end_it() {
        let h = start(prepared(-10_000, 60.0), None);
        advance(100).await;
        assert_eq!(h.session.sync_status().phase, Some(Phase::Live));
        h.player.take_commands();

        // Server clock turns out to be two minutes ahead
        h.server.skew_ms.store(120_000, Ordering::SeqCst);
        h.session.recalibrate();
        advance(1_000).await;

        assert_eq!(h.session.clock_offset().offset_ms, 120_000);
        assert!(h.session.is_finished());
        assert_eq!(
            h.observer.transitions.lock().last(),
            Some(&(Some(Phase::Live), Phase::Ended))
        );
        let commands = h.player.take_commands();
        assert_eq!(
            &commands[commands.len() - 2..],
            &[Command::Seek(60.0), Command::Pause]
        );
        assert_eq!(h.observer.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_clock_fails_open() {
        let local = Arc::new(TokioClock::new(BASE_MS));
        let server = SkewedServer::down(Arc::clone(&local));
        let h = start(prepared(-10_000, 3600.0), Some(server));

        advance(100).await;
        assert_eq!(h.session.clock_offset(), ClockOffset::default());
        assert_eq!(h.session.sync_status().phase, Some(Phase::Live));
        assert_eq!(h.player.take_commands(), vec![Command::Seek(10.0), Command::Play]);
        assert_eq!(h.observer.failures.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.sync_status().calibration_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewer_seek_and_pause_are_undone() {
        let h = start(prepared(-20_000, 3600.0), None);
        advance(100).await;
        h.player.take_commands();

        // Scrub ahead by one second: inside tolerance, still overridden
        *h.player.position.lock() = 21.1;
        h.session.player_seeked(21.1);
        advance(1).await;
        let commands = h.player.take_commands();
        match commands.as_slice() {
            [Command::Seek(p)] => assert!((p - 20.1).abs() < 0.05, "seeked to {}", p),
            other => panic!("unexpected commands {:?}", other),
        }

        // Pause: resumed once the settle delay has passed
        *h.player.paused.lock() = true;
        h.session.player_paused();
        advance(500).await;
        assert!(!h.player.take_commands().contains(&Command::Play));
        advance(600).await;
        assert!(h.player.take_commands().contains(&Command::Play));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tears_down_timers() {
        let mut h = start(prepared(60_000, 3600.0), None);
        advance(10).await;
        let calls = h.server.calls.load(Ordering::SeqCst);

        h.session.stop();
        advance(10).await;
        assert!(h.session.is_finished());

        advance(300_000).await;
        assert_eq!(h.server.calls.load(Ordering::SeqCst), calls);
        assert_eq!(h.observer.finished.load(Ordering::SeqCst), 1);
    }

    struct FakeCatalog {
        record: StreamRecord,
        tokens_ok: bool,
        token_requests: AtomicUsize,
    }

    #[async_trait]
    impl StreamCatalog for FakeCatalog {
        async fn stream(&self, stream_id: &str) -> Result<StreamRecord, ApiError> {
            if stream_id == self.record.id {
                Ok(self.record.clone())
            } else {
                Err(ApiError::NotFound(stream_id.to_string()))
            }
        }

        async fn signed_tokens(&self, playback_id: &str) -> Result<SignedTokens, ApiError> {
            self.token_requests.fetch_add(1, Ordering::SeqCst);
            if self.tokens_ok {
                Ok(SignedTokens {
                    playback: format!("tok-{}", playback_id),
                    thumbnail: None,
                    storyboard: None,
                    expires_at: None,
                })
            } else {
                Err(ApiError::Api("issuer down".to_string()))
            }
        }
    }

    fn catalog(policy: PlaybackPolicy, active: bool, tokens_ok: bool) -> FakeCatalog {
        FakeCatalog {
            record: record(policy, active),
            tokens_ok,
            token_requests: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn test_prepare_public_stream_skips_tokens() {
        let catalog = catalog(PlaybackPolicy::Public, true, false);
        let prepared = prepare_stream(&catalog, "launch").await.unwrap();

        assert!(prepared.tokens.is_none());
        assert_eq!(prepared.schedule.scheduled_start_ms, BASE_MS);
        assert_eq!(catalog.token_requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prepare_signed_stream_fetches_tokens() {
        let catalog = catalog(PlaybackPolicy::Signed, true, true);
        let prepared = prepare_stream(&catalog, "launch").await.unwrap();

        assert_eq!(prepared.tokens.unwrap().playback, "tok-pb-1");
    }

    #[tokio::test]
    async fn test_prepare_signed_stream_without_tokens_is_blocked() {
        let catalog = catalog(PlaybackPolicy::Signed, true, false);
        let err = prepare_stream(&catalog, "launch").await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::SignedVideoUnavailable { ref playback_id, .. } if playback_id == "pb-1"
        ));
    }

    #[tokio::test]
    async fn test_prepare_rejects_inactive_and_missing() {
        let catalog = catalog(PlaybackPolicy::Public, false, true);
        assert!(matches!(
            prepare_stream(&catalog, "launch").await,
            Err(SessionError::Inactive(_))
        ));
        assert!(matches!(
            prepare_stream(&catalog, "nope").await,
            Err(SessionError::Api(ApiError::NotFound(_)))
        ));
    }
}
