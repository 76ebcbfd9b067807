//! Core utilities shared by the Venus crates.
//!
//! This crate provides foundational types used across the engine:
//! - The `(base, sub)` error taxonomy and structured error reporting
//! - Logging initialization
//! - Timer and frame clock utilities

mod error;
mod frame_clock;
mod logging;
mod timer;

pub use error::{BaseKind, ErrorCode, SubKind};
pub use frame_clock::{FrameClock, FrameInfo};
pub use logging::{init_logging, report_error};
pub use timer::Timer;
