//! FFI bindings for native UI integration
//!
//! This module provides the interface exposed via uniffi to Swift/Kotlin.

mod types;
mod viewer;

pub use types::*;
pub use viewer::*;
