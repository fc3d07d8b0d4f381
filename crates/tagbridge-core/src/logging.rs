/*!
 * Logging functionality for TagBridge.
 *
 * This module provides tracing setup and the spans used to attribute log
 * lines to a device worker.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system from the logging configuration
pub fn init_with_config(config: &LoggingConfig) -> Result<()> {
    install(&config.level, config.with_target)
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "tagbridge_devices=trace")
///
/// `RUST_LOG` takes precedence when set.
pub fn init_with_filter(filter: &str) -> Result<()> {
    install(filter, true)
}

fn install(filter: &str, with_target: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(with_target))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create the span a device worker runs in
///
/// # Arguments
///
/// * `device` - The device name
/// * `driver` - The driver kind serving the device
pub fn device_span(device: &str, driver: &str) -> Span {
    tracing::info_span!("device", name = %device, driver = %driver)
}

/// Create a new span for a gateway operation
///
/// # Arguments
///
/// * `name` - The name of the operation
/// * `path` - The tag path the operation targets
pub fn operation_span(name: &str, path: &str) -> Span {
    tracing::debug_span!("operation", name = %name, path = %path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_fails_cleanly() {
        // Another test in this process may already have installed a subscriber
        let _ = init();
        assert!(init().is_err());
    }

    #[test]
    fn test_spans() {
        let span = device_span("temp1", "test");
        let _entered = span.enter();
        let span = operation_span("read", "temp1/test");
        let _entered = span.enter();
    }
}
