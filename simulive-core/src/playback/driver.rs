//! Drift-correcting playback driver
//!
//! One long-lived state machine per viewing session. Every tick it
//! recomputes the authoritative state and pushes the player (which it does
//! not own) toward it: holds the cursor at 0 during pre-roll, starts at 0
//! when the broadcast begins, snaps back when the cursor drifts, undoes
//! pauses and seeks while live, and parks the cursor at the end.

use tracing::{debug, info};

use super::state::{has_drifted, playback_state, Phase, PlaybackState};
use crate::schedule::StreamSchedule;

/// Default delay before undoing a pause while live (ms)
pub const DEFAULT_RESUME_SETTLE_DELAY_MS: u64 = 1_000;

/// Seeks reported within this distance of our own last seek are our own echo
const OWN_SEEK_ECHO_SECS: f64 = 0.5;

/// The playback cursor being driven (a video element, native player, ...)
pub trait PlayerCursor: Send + Sync {
    /// Current cursor position in seconds
    fn position(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn seek(&self, position_secs: f64);
    fn play(&self);
    fn pause(&self);
}

/// What the viewer should see on top of the player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Overlay {
    /// Waiting for the broadcast to start
    Countdown { seconds_until_start: f64 },
    /// Player visible, no overlay
    Hidden,
    /// Broadcast is over
    Ended,
}

impl Overlay {
    pub fn for_state(state: &PlaybackState) -> Self {
        match state.phase() {
            Phase::PreRoll => Overlay::Countdown {
                seconds_until_start: state.seconds_until_start,
            },
            Phase::Live => Overlay::Hidden,
            Phase::Ended => Overlay::Ended,
        }
    }
}

/// A command the driver issued to the player on a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CursorAction {
    /// Session opened before the start: cursor parked at 0, paused
    HeldAtStart,
    /// Broadcast began: playback started from 0
    StartedFromZero,
    /// Session opened mid-broadcast: jumped to the live position
    JoinedLive { position: f64 },
    /// Cursor drifted beyond tolerance and was snapped back
    Corrected { from: f64, to: f64 },
    /// A viewer seek was overridden
    SeekOverridden { from: f64, to: f64 },
    /// A pause was undone after the settle delay
    Resumed { position: f64 },
    /// Broadcast ended: cursor forced to the end and paused
    ForcedEnd { position: f64 },
}

/// Result of one driver tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub state: PlaybackState,
    pub phase: Phase,
    /// Set when the phase differs from the previous tick
    pub transition: Option<(Option<Phase>, Phase)>,
    pub action: Option<CursorAction>,
    /// `actual - expected` in seconds, measured while live
    pub drift_secs: Option<f64>,
    pub overlay: Overlay,
}

/// Per-session drift-correction state machine
#[derive(Debug, Clone)]
pub struct SyncDriver {
    schedule: StreamSchedule,
    settle_delay_ms: i64,
    phase: Option<Phase>,
    /// Synced time at which a pause was first observed while live
    paused_since_ms: Option<i64>,
    /// A viewer seek is waiting to be overridden
    seek_pending: bool,
    /// Target and synced time of the last seek we issued
    last_own_seek: Option<(f64, i64)>,
}

impl SyncDriver {
    pub fn new(schedule: StreamSchedule, settle_delay_ms: u64) -> Self {
        Self {
            schedule,
            settle_delay_ms: settle_delay_ms as i64,
            phase: None,
            paused_since_ms: None,
            seek_pending: false,
            last_own_seek: None,
        }
    }

    pub fn schedule(&self) -> &StreamSchedule {
        &self.schedule
    }

    /// Phase as of the last tick (None before the first tick)
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn has_ended(&self) -> bool {
        self.phase == Some(Phase::Ended)
    }

    /// Pure evaluation without touching the player or the machine
    pub fn evaluate(&self, synced_time_ms: i64) -> PlaybackState {
        playback_state(synced_time_ms, &self.schedule)
    }

    /// The player reported a seek to `position` at synced time `now_ms`.
    ///
    /// Seeks that land where we just sent the cursor, within one sync
    /// interval of sending it, are echoes of our own corrections and are
    /// ignored.
    pub fn notify_seeked(&mut self, position: f64, now_ms: i64) {
        if let Some((own, at_ms)) = self.last_own_seek.take() {
            let fresh = now_ms.saturating_sub(at_ms) <= self.schedule.sync_interval_ms as i64;
            if fresh && (position - own).abs() <= OWN_SEEK_ECHO_SECS {
                return;
            }
        }
        if self.phase == Some(Phase::Live) {
            debug!("Viewer seek to {:.2}s will be overridden", position);
            self.seek_pending = true;
        }
    }

    /// The player reported a pause at synced time `now_ms`
    pub fn notify_paused(&mut self, now_ms: i64) {
        if self.phase == Some(Phase::Live) && self.paused_since_ms.is_none() {
            self.paused_since_ms = Some(now_ms);
        }
    }

    /// Synced time at which a pending pause may be undone
    pub fn resume_due_at(&self) -> Option<i64> {
        self.paused_since_ms
            .map(|since| since.saturating_add(self.settle_delay_ms))
    }

    fn seek(&mut self, player: &dyn PlayerCursor, position: f64, now_ms: i64) {
        self.last_own_seek = Some((position, now_ms));
        player.seek(position);
    }

    /// Recompute state at `synced_time_ms` and correct the player.
    pub fn tick(&mut self, synced_time_ms: i64, player: &dyn PlayerCursor) -> TickOutcome {
        let state = self.evaluate(synced_time_ms);
        let previous = self.phase;

        // ENDED is terminal, whatever the clock says now
        if previous == Some(Phase::Ended) {
            return TickOutcome {
                state,
                phase: Phase::Ended,
                transition: None,
                action: None,
                drift_secs: None,
                overlay: Overlay::Ended,
            };
        }

        let phase = state.phase();
        self.phase = Some(phase);
        let transition = (previous != Some(phase)).then_some((previous, phase));
        if let Some((from, to)) = transition {
            info!(
                "Playback phase {} -> {}",
                from.map(|p| p.as_str()).unwrap_or("none"),
                to.as_str()
            );
        }

        let mut drift_secs = None;
        let action = match (previous, phase) {
            (_, Phase::Ended) => {
                let end = self.schedule.video_duration_secs;
                self.seek(player, end, synced_time_ms);
                player.pause();
                self.paused_since_ms = None;
                self.seek_pending = false;
                Some(CursorAction::ForcedEnd { position: end })
            }
            (None, Phase::PreRoll) => {
                self.seek(player, 0.0, synced_time_ms);
                player.pause();
                Some(CursorAction::HeldAtStart)
            }
            (_, Phase::PreRoll) => None,
            (Some(Phase::PreRoll), Phase::Live) => {
                self.seek(player, 0.0, synced_time_ms);
                player.play();
                Some(CursorAction::StartedFromZero)
            }
            (None, Phase::Live) => {
                let position = state.current_position;
                self.seek(player, position, synced_time_ms);
                player.play();
                Some(CursorAction::JoinedLive { position })
            }
            (Some(_), Phase::Live) => {
                let (action, drift) = self.correct_live(synced_time_ms, &state, player);
                drift_secs = drift;
                action
            }
        };

        TickOutcome {
            state,
            phase,
            transition,
            action,
            drift_secs,
            overlay: Overlay::for_state(&state),
        }
    }

    fn correct_live(
        &mut self,
        now_ms: i64,
        state: &PlaybackState,
        player: &dyn PlayerCursor,
    ) -> (Option<CursorAction>, Option<f64>) {
        let expected = state.current_position;
        let actual = player.position();
        let drift = actual.is_finite().then_some(actual - expected);

        if self.seek_pending {
            self.seek_pending = false;
            self.seek(player, expected, now_ms);
            if player.is_paused() {
                player.play();
            }
            return (
                Some(CursorAction::SeekOverridden {
                    from: actual,
                    to: expected,
                }),
                drift,
            );
        }

        if player.is_paused() {
            let since = *self.paused_since_ms.get_or_insert(now_ms);
            if now_ms.saturating_sub(since) < self.settle_delay_ms {
                return (None, drift);
            }
            self.paused_since_ms = None;
            if !actual.is_finite()
                || has_drifted(actual, expected, self.schedule.drift_tolerance_secs)
            {
                self.seek(player, expected, now_ms);
            }
            player.play();
            return (Some(CursorAction::Resumed { position: expected }), drift);
        }

        self.paused_since_ms = None;
        if !actual.is_finite() || has_drifted(actual, expected, self.schedule.drift_tolerance_secs) {
            debug!(
                "Drift {:+.2}s exceeds {:.2}s, correcting to {:.2}s",
                actual - expected,
                self.schedule.drift_tolerance_secs,
                expected
            );
            self.seek(player, expected, now_ms);
            return (
                Some(CursorAction::Corrected {
                    from: actual,
                    to: expected,
                }),
                drift,
            );
        }

        (None, drift)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Commands recorded by the fake player
    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Command {
        Seek(f64),
        Play,
        Pause,
    }

    /// Player that obeys commands instantly and records them
    #[derive(Default)]
    pub(crate) struct FakePlayer {
        pub position: Mutex<f64>,
        pub paused: Mutex<bool>,
        pub commands: Mutex<Vec<Command>>,
    }

    impl FakePlayer {
        pub(crate) fn paused_at(position: f64) -> Self {
            Self {
                position: Mutex::new(position),
                paused: Mutex::new(true),
                commands: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn take_commands(&self) -> Vec<Command> {
            std::mem::take(&mut *self.commands.lock())
        }
    }

    impl PlayerCursor for FakePlayer {
        fn position(&self) -> f64 {
            *self.position.lock()
        }

        fn is_paused(&self) -> bool {
            *self.paused.lock()
        }

        fn seek(&self, position_secs: f64) {
            *self.position.lock() = position_secs;
            self.commands.lock().push(Command::Seek(position_secs));
        }

        fn play(&self) {
            *self.paused.lock() = false;
            self.commands.lock().push(Command::Play);
        }

        fn pause(&self) {
            *self.paused.lock() = true;
            self.commands.lock().push(Command::Pause);
        }
    }

    const T: i64 = 1_000_000;

    fn driver() -> SyncDriver {
        let schedule = StreamSchedule::new(T, 100.0, 1000, 2.0).unwrap();
        SyncDriver::new(schedule, 1_000)
    }

    #[test]
    fn test_pre_roll_holds_then_starts_from_zero() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(7.0);

        let out = driver.tick(T - 5_000, &player);
        assert_eq!(out.action, Some(CursorAction::HeldAtStart));
        assert_eq!(out.overlay, Overlay::Countdown { seconds_until_start: 5.0 });
        assert_eq!(player.take_commands(), vec![Command::Seek(0.0), Command::Pause]);

        let out = driver.tick(T - 1_000, &player);
        assert_eq!(out.action, None);
        assert!(player.take_commands().is_empty());

        // Tick lands slightly after the start: still begin at 0
        let out = driver.tick(T + 400, &player);
        assert_eq!(out.transition, Some((Some(Phase::PreRoll), Phase::Live)));
        assert_eq!(out.action, Some(CursorAction::StartedFromZero));
        assert_eq!(out.overlay, Overlay::Hidden);
        assert_eq!(player.take_commands(), vec![Command::Seek(0.0), Command::Play]);
    }

    #[test]
    fn test_join_mid_broadcast() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);

        let out = driver.tick(T + 42_000, &player);
        assert_eq!(out.transition, Some((None, Phase::Live)));
        assert_eq!(out.action, Some(CursorAction::JoinedLive { position: 42.0 }));
        assert_eq!(player.take_commands(), vec![Command::Seek(42.0), Command::Play]);
    }

    #[test]
    fn test_drift_within_tolerance_is_left_alone() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);
        driver.tick(T + 10_000, &player);
        player.take_commands();

        *player.position.lock() = 21.5;
        let out = driver.tick(T + 20_000, &player);
        assert_eq!(out.action, None);
        assert_eq!(out.drift_secs, Some(1.5));
        assert!(player.take_commands().is_empty());
    }

    #[test]
    fn test_drift_beyond_tolerance_is_corrected() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);
        driver.tick(T + 10_000, &player);
        player.take_commands();

        *player.position.lock() = 15.0;
        let out = driver.tick(T + 20_000, &player);
        assert_eq!(
            out.action,
            Some(CursorAction::Corrected { from: 15.0, to: 20.0 })
        );
        assert_eq!(player.take_commands(), vec![Command::Seek(20.0)]);
    }

    #[test]
    fn test_viewer_seek_is_overridden_even_within_tolerance() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);
        driver.tick(T + 10_000, &player);
        player.take_commands();

        // Our own correction echoing back is ignored
        driver.notify_seeked(10.0, T + 10_400);
        let out = driver.tick(T + 10_500, &player);
        assert_eq!(out.action, None);

        *player.position.lock() = 11.5;
        driver.notify_seeked(11.5, T + 10_600);
        let out = driver.tick(T + 10_600, &player);
        assert_eq!(
            out.action,
            Some(CursorAction::SeekOverridden { from: 11.5, to: 10.6 })
        );
        assert_eq!(player.take_commands(), vec![Command::Seek(10.6)]);
    }

    #[test]
    fn test_own_seek_without_echo_does_not_mask_later_viewer_seek() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);
        driver.tick(T + 10_000, &player);
        player.take_commands();

        // The player never echoes the join seek to 10.0. Much later the
        // viewer scrubs back to almost exactly that spot.
        *player.position.lock() = 10.2;
        driver.notify_seeked(10.2, T + 15_000);
        let out = driver.tick(T + 15_000, &player);
        assert_eq!(
            out.action,
            Some(CursorAction::SeekOverridden { from: 10.2, to: 15.0 })
        );
        assert_eq!(player.take_commands(), vec![Command::Seek(15.0)]);
    }

    #[test]
    fn test_pause_is_undone_after_settle_delay() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);
        driver.tick(T + 10_000, &player);
        player.take_commands();

        *player.paused.lock() = true;
        driver.notify_paused(T + 10_200);
        assert_eq!(driver.resume_due_at(), Some(T + 11_200));

        // Still settling
        let out = driver.tick(T + 10_800, &player);
        assert_eq!(out.action, None);
        assert!(player.take_commands().is_empty());

        // Cursor sat at 10.0 while paused: 1.2s behind, within tolerance
        let out = driver.tick(T + 11_200, &player);
        assert_eq!(out.action, Some(CursorAction::Resumed { position: 11.2 }));
        assert_eq!(player.take_commands(), vec![Command::Play]);
        assert_eq!(driver.resume_due_at(), None);
    }

    #[test]
    fn test_long_pause_resumes_at_live_position() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);
        driver.tick(T + 10_000, &player);
        player.take_commands();

        *player.paused.lock() = true;
        driver.tick(T + 11_000, &player); // pause first seen on a tick
        let out = driver.tick(T + 30_000, &player);
        assert_eq!(out.action, Some(CursorAction::Resumed { position: 30.0 }));
        assert_eq!(player.take_commands(), vec![Command::Seek(30.0), Command::Play]);
    }

    #[test]
    fn test_live_to_ended_is_terminal() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);
        driver.tick(T + 99_000, &player);
        player.take_commands();

        let out = driver.tick(T + 100_000, &player);
        assert_eq!(out.transition, Some((Some(Phase::Live), Phase::Ended)));
        assert_eq!(out.action, Some(CursorAction::ForcedEnd { position: 100.0 }));
        assert_eq!(out.overlay, Overlay::Ended);
        assert_eq!(player.take_commands(), vec![Command::Seek(100.0), Command::Pause]);

        // A clock correction moving time backwards does not revive the stream
        let out = driver.tick(T + 50_000, &player);
        assert_eq!(out.phase, Phase::Ended);
        assert_eq!(out.action, None);
        assert!(player.take_commands().is_empty());
        assert!(driver.has_ended());
    }

    #[test]
    fn test_pre_roll_straight_to_ended() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);
        driver.tick(T - 1_000, &player);
        player.take_commands();

        let out = driver.tick(T + 500_000, &player);
        assert_eq!(out.transition, Some((Some(Phase::PreRoll), Phase::Ended)));
        assert_eq!(out.action, Some(CursorAction::ForcedEnd { position: 100.0 }));
    }

    #[test]
    fn test_non_finite_player_position_is_resynced() {
        let mut driver = driver();
        let player = FakePlayer::paused_at(0.0);
        driver.tick(T + 10_000, &player);
        player.take_commands();

        *player.position.lock() = f64::NAN;
        let out = driver.tick(T + 12_000, &player);
        assert_eq!(out.drift_secs, None);
        assert_eq!(player.take_commands(), vec![Command::Seek(12.0)]);
    }
}
