//! Playback Engine
//!
//! Maps synced time to the authoritative playback state and drives a
//! player toward it.

mod driver;
mod state;

pub use driver::*;
pub use state::*;

#[cfg(test)]
pub(crate) use driver::tests::{Command, FakePlayer};
