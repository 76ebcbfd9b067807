//! Logging initialization and structured error reporting.

use std::fmt::Display;
use std::panic::Location;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::ErrorCode;

/// Initialize the logging system with tracing.
///
/// This sets up tracing-subscriber with:
/// - Environment-based filtering (RUST_LOG)
/// - Target and thread ids on every line
///
/// # Example
/// ```
/// venus_core::init_logging();
/// tracing::info!("Engine starting");
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,venus=debug,venus_rhi=debug,venus_renderer=debug"));

    // A second call (e.g. from doctests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}

/// Logs a single structured line for a failure.
///
/// The line carries the taxonomy code as `base`/`sub` fields. Debug builds
/// also record the source location of the caller.
#[track_caller]
pub fn report_error(context: &str, code: ErrorCode, error: &dyn Display) {
    if cfg!(debug_assertions) {
        let location = Location::caller();
        tracing::error!(
            base = code.base.name(),
            sub = code.sub.name(),
            location = %format_args!("{}:{}", location.file(), location.line()),
            "{context}: {error}"
        );
    } else {
        tracing::error!(
            base = code.base.name(),
            sub = code.sub.name(),
            "{context}: {error}"
        );
    }
}
