//! Simulive - Core Library
//!
//! Client-side engine for simulated-live streams: a pre-recorded video is
//! presented as a live broadcast by keeping every viewer's player at the
//! position implied by the server clock and the stream's scheduled start.

pub mod api;
pub mod clock;
pub mod config;
pub mod drift;
pub mod ffi;
pub mod playback;
pub mod schedule;
pub mod session;

// Re-exports for convenience
pub use api::{ApiError, StreamCatalog, StreamClient};
pub use clock::{ClockOffset, ClockSource, LocalClock, SessionClock, SystemClock};
pub use config::SyncConfig;
pub use playback::{has_drifted, playback_state, Phase, PlaybackState, PlayerCursor, SyncDriver};
pub use schedule::{PlaybackPolicy, SignedTokens, StreamRecord, StreamSchedule};
pub use session::{prepare_stream, PreparedStream, SessionError, ViewerSession};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();
