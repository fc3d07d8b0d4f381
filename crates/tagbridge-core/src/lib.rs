/*!
 * TagBridge Core
 *
 * This crate provides the pieces every other TagBridge crate builds on: the
 * value model, the tag tree, configuration loading and logging setup.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use chrono;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
}

/// TagBridge core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
