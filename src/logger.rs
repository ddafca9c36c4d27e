//! Centralized logging configuration for the pendulum-cv binary and benchmarks
//!
//! The library itself only emits `tracing` events; installing a subscriber is left
//! to executables, which call [`init_logger`] once at start-up.

use tracing::Level;

/// Initialize the tracing subscriber with the default INFO level
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// # Example
/// ```no_run
/// use pendulum_cv::init_logger;
///
/// init_logger();
/// tracing::info!("Pipeline started");
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=debug cargo run --bin pendulum_pipeline
/// RUST_LOG=pendulum_cv::optimizer=trace cargo run --bin pendulum_pipeline
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Calling it a second time is a no-op, so tests and benchmarks may call it freely.
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
pub fn init_logger_with_level(default_level: Level) {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    // Remaining fmt options stay at their defaults: timestamp, level, no file or thread info.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        // The module path names the pipeline stage that emitted the event.
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_is_idempotent() {
        init_logger_with_level(Level::DEBUG);
        init_logger();
        tracing::debug!("logger initialised twice without panicking");
    }
}
