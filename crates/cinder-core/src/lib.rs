//! Core types and utilities for the Cinder engine.
//!
//! This crate provides the foundational pieces used throughout the engine:
//! - A linear arena for sub-allocating byte ranges
//! - The engine-wide error type
//! - Shared constants

pub mod arena;
pub mod error;

pub use arena::{align_up, ArenaRange, LinearArena};
pub use error::{Error, Result};

/// Engine-wide constants
pub mod constants {
    /// Engine name reported to the graphics driver.
    pub const ENGINE_NAME: &str = "Cinder";
    /// Default number of frames the CPU may record ahead of the GPU.
    pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
}
