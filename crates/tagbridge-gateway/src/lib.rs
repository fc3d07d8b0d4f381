/*!
 * TagBridge Gateway
 *
 * This crate ties the devices of a TagBridge installation together: it
 * routes tag requests to the arbiter owning them, bridges the asynchronous
 * device world to immediate front-end reads through a value cache, and
 * bootstraps all of it from configuration.
 */

#![warn(missing_docs)]

// Re-export core types
pub use tagbridge_core::prelude;

pub mod cache;
pub mod error;
pub mod router;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use cache::ValueCache;
pub use error::{GatewayError, Result};
pub use router::DeviceRouter;
pub use service::{DeviceStatus, Gateway};
pub use store::{MemoryTagStore, TagStore};

/// TagBridge gateway crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
