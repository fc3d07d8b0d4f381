/*!
 * Routing of tag requests to device arbiters.
 */
use std::sync::Arc;

use tagbridge_core::node::{TreeNode, VariableNode, WritableVariable};
use tagbridge_core::types::Value;
use tagbridge_devices::{Arbiter, ReadHandle, WriteHandle};

use crate::error::{GatewayError, Result};

/// Dispatches requests to the arbiter of the device owning a tag.
///
/// The owner is the device whose folder is the closest ancestor of the tag.
#[derive(Debug, Clone, Default)]
pub struct DeviceRouter {
    arbiters: Vec<Arc<Arbiter>>,
}

impl DeviceRouter {
    /// Create a router over a set of arbiters
    pub fn new(arbiters: Vec<Arc<Arbiter>>) -> Self {
        Self { arbiters }
    }

    /// All arbiters in configuration order
    pub fn arbiters(&self) -> &[Arc<Arbiter>] {
        &self.arbiters
    }

    /// The arbiter of a device by name
    pub fn arbiter(&self, device: &str) -> Option<&Arc<Arbiter>> {
        self.arbiters.iter().find(|a| a.device().name() == device)
    }

    /// The arbiter owning a node
    pub fn route<N: TreeNode + ?Sized>(&self, node: &N) -> Result<&Arc<Arbiter>> {
        self.arbiters
            .iter()
            .filter(|a| a.folder().is_parent_of(node))
            .max_by_key(|a| a.folder().path().len())
            .ok_or_else(|| GatewayError::UnknownDevice(node.path_string().to_string()))
    }

    /// Read a variable through its device's arbiter
    pub fn read(&self, variable: Arc<VariableNode>) -> Result<ReadHandle> {
        let arbiter = self.route(variable.as_ref())?;
        Ok(arbiter.read(variable))
    }

    /// Write a variable through its device's arbiter
    pub fn write(&self, variable: WritableVariable, value: Value) -> Result<WriteHandle> {
        let arbiter = self.route(variable.variable().as_ref())?;
        Ok(arbiter.write(variable, value))
    }
}
