/*!
 * Prelude module for TagBridge Core.
 *
 * This module re-exports commonly used types and functions from the TagBridge Core crate
 * to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{convert_value, DataType, DataValue, StatusCode, Value};

// Re-export the tag tree
pub use crate::node::{FolderNode, Node, TreeNode, VariableNode, WritableVariable};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, Device};

// Re-export utility functions
pub use crate::utils::{block_on, spawn_and_log, with_timeout};

// Re-export logging setup and macros
pub use crate::logging::init_with_filter as init_logging;
pub use tracing::{debug, error, info, trace, warn};
