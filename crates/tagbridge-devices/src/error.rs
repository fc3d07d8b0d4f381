/*!
 * Error types for device drivers and the request arbiter.
 */
use std::sync::Arc;

use thiserror::Error;

use tagbridge_core::error::Error as CoreError;

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Configuration error, disables the affected device
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No driver is registered under the requested kind
    #[error("Unknown device driver {0:?}")]
    UnknownDriver(String),

    /// The device is not connected
    #[error("Device not connected")]
    NotConnected,

    /// Communication error with the device
    #[error("Communication error: {0}")]
    Communication(String),

    /// The device answered something the driver cannot interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// The driver or variable does not support writes
    #[error("Writes are not supported for {0}")]
    UnsupportedWrite(String),

    /// A completion arrived for a request that is not pending.
    ///
    /// This is a bookkeeping defect between arbiter and driver, never the
    /// result of device behaviour.
    #[error("No pending request for {0}")]
    NoPendingRequest(String),

    /// The device failed to initialize and serves no requests
    #[error("Device {0} is inactive")]
    DeviceInactive(String),

    /// The arbiter stopped before answering the request
    #[error("Request for {0} was abandoned")]
    Abandoned(String),

    /// A write was answered with an error by the driver
    #[error("Write to {path} failed: {source}")]
    WriteFailed {
        /// Path of the written variable
        path: String,
        /// The error reported by the driver, shared by all coalesced writers
        #[source]
        source: Arc<DeviceError>,
    },

    /// Driver failure not covered by another variant
    #[error("Driver error: {0}")]
    Driver(String),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl DeviceError {
    /// Create a new configuration error
    pub fn configuration<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Configuration(msg.as_ref().to_string())
    }

    /// Create a new communication error
    pub fn communication<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Communication(msg.as_ref().to_string())
    }

    /// Create a new protocol error
    pub fn protocol<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Protocol(msg.as_ref().to_string())
    }

    /// Create a new driver error
    pub fn driver<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::Driver(msg.as_ref().to_string())
    }

    /// Whether this error stems from configuration rather than the device
    pub fn is_configuration(&self) -> bool {
        match self {
            DeviceError::Configuration(_) | DeviceError::UnknownDriver(_) => true,
            DeviceError::Core(e) => e.is_config(),
            _ => false,
        }
    }
}
