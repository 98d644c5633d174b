//! Stream Schedules
//!
//! Wire records for streams and the validated schedule snapshot the
//! playback engine reads.

mod record;
mod snapshot;

pub use record::*;
pub use snapshot::*;
