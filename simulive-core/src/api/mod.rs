//! Stream API Client
//!
//! HTTP client for the clock endpoint, stream records and playback tokens.

mod client;

pub use client::{ApiError, StreamCatalog, StreamClient};
