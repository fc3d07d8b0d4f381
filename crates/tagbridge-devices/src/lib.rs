/*!
 * TagBridge Devices
 *
 * This crate provides the driver contract, the drivers shipped with
 * TagBridge and the arbiter that serializes access to each device.
 */

#![warn(missing_docs)]

// Re-export core types
pub use tagbridge_core::prelude;

pub mod arbiter;
pub mod driver;
pub mod drivers;
pub mod error;
mod pending;
pub mod registry;
pub mod request;

pub use arbiter::{Arbiter, ArbiterState};
pub use driver::{BatchDriver, CompletionSink, DeviceDriver, SingleRequestDriver};
pub use error::{DeviceError, Result};
pub use pending::{ReadHandle, WriteHandle};
pub use registry::{DriverFactory, DriverRegistry};
pub use request::{DeviceRequest, ReadRequest, WriteRequest};

/// TagBridge devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
