//! Logging configuration for the flowgraph crate
//!
//! This module provides utilities for initializing and configuring logging
//! using the `log` and `env_logger` crates.
//!
//! # Usage
//!
//! ```rust,ignore
//! use flowgraph::logging;
//!
//! // Initialize with default level (Warn)
//! logging::init();
//!
//! // Or initialize from RUST_LOG environment variable
//! logging::init_from_env();
//!
//! // Or initialize with a specific level
//! logging::init_with_level(log::LevelFilter::Debug);
//! ```
//!
//! # Log Levels
//!
//! The flowgraph crate uses log levels as follows:
//!
//! - `error!` - Actual errors that should always be shown
//! - `warn!` - Warnings that may indicate problems
//! - `info!` - High-level progress (per-unit construction)
//! - `debug!` - Detailed debugging (per-pseudocode phases, splicing)
//! - `trace!` - Very verbose (per-instruction emission and edge wiring)
//!
//! # Environment Variable
//!
//! Set `RUST_LOG` to control logging at runtime:
//!
//! ```bash
//! RUST_LOG=warn cargo test   # Default, quiet output
//! RUST_LOG=debug cargo test  # Show construction phases
//! RUST_LOG=trace cargo test  # Very verbose
//! ```
//!
//! You can also filter by module:
//!
//! ```bash
//! RUST_LOG=flowgraph::graph::postprocess=debug cargo test
//! RUST_LOG=flowgraph::builder=trace cargo test
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize logging with sensible defaults (Warn level).
///
/// This only initializes once; subsequent calls are no-ops.
/// Use this in binaries and test entry points.
pub fn init() {
    init_with_level(LevelFilter::Warn);
}

/// Initialize logging with a specific level.
///
/// This only initializes once; subsequent calls are no-ops, and so is the
/// first call if the embedding program already installed a logger.
pub fn init_with_level(level: LevelFilter) {
    INIT.call_once(|| {
        let _ = Builder::new()
            .filter_level(level)
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{:5}] {}:{} - {}",
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .try_init();
    });
}

/// Initialize logging from the RUST_LOG environment variable.
///
/// If RUST_LOG is not set, defaults to Warn level.
/// This only initializes once; subsequent calls are no-ops, and so is the
/// first call if the embedding program already installed a logger.
pub fn init_from_env() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
            .try_init();
    });
}

/// Initialize logging for tests.
///
/// Uses test-friendly output format and suppresses most output unless
/// RUST_LOG is explicitly set.
///
/// # Usage in Tests
///
/// ```rust,ignore
/// #[test]
/// fn test_something() {
///     flowgraph::logging::init_test();
///     // Test code...
/// }
/// ```
pub fn init_test() {
    // try_init() doesn't panic if already initialized
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Warn)
        .is_test(true)
        .try_init();
}

/// Check if logging has been initialized.
///
/// Note: This doesn't guarantee logs will be output - only that init was called.
pub fn is_initialized() -> bool {
    // We can't easily check if env_logger is initialized,
    // but we can track our own initialization
    INIT.is_completed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        // Multiple calls should not panic
        init_test();
        init_test();
        init_test();
    }

    #[test]
    fn test_explicit_init_is_tracked() {
        // The guarded entry points are driven only from this test, so the
        // flag starts clear regardless of test order.
        assert!(!is_initialized());
        init_with_level(LevelFilter::Warn);
        assert!(is_initialized());

        // Every further entry point is a no-op behind the same guard.
        init();
        init_from_env();
        assert!(is_initialized());
        log::warn!("logging initialized explicitly");
    }

    #[test]
    fn test_log_levels() {
        init_test();

        // These should not panic
        log::error!("Test error message");
        log::warn!("Test warning message");
        log::info!("Test info message");
        log::debug!("Test debug message");
        log::trace!("Test trace message");
    }
}
