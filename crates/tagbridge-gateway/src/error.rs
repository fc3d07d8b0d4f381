/*!
 * Error types for the TagBridge gateway crate.
 */
use thiserror::Error;

/// Error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// No configured device owns the addressed tag
    #[error("No device owns {0}")]
    UnknownDevice(String),

    /// A client tried to write a read-only tag
    #[error("Tag {0} is not writable")]
    NotWritable(String),

    /// Device error
    #[error("Device error: {0}")]
    Device(#[from] tagbridge_devices::DeviceError),

    /// Core error
    #[error("Core error: {0}")]
    Core(#[from] tagbridge_core::error::Error),
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
