/*!
 * Requests handed to device drivers.
 *
 * Request equality is the coalescing key of the arbiter: two reads of the
 * same variable are the same request, and two writes are the same only when
 * both variable and value match.
 */
use std::fmt;
use std::sync::Arc;

use tagbridge_core::node::{TreeNode, VariableNode, WritableVariable};
use tagbridge_core::types::Value;

/// A pending read of one variable
#[derive(Clone, PartialEq, Eq)]
pub struct ReadRequest {
    variable: Arc<VariableNode>,
}

/// A pending write of one value to one variable
#[derive(Clone)]
pub struct WriteRequest {
    variable: WritableVariable,
    value: Value,
}

/// A request for a device driver
#[derive(Clone, PartialEq, Eq)]
pub enum DeviceRequest {
    /// Read a variable
    Read(ReadRequest),
    /// Write a variable
    Write(WriteRequest),
}

impl ReadRequest {
    /// Create a read request
    pub fn new(variable: Arc<VariableNode>) -> Self {
        Self { variable }
    }

    /// The variable to read
    pub fn variable(&self) -> &Arc<VariableNode> {
        &self.variable
    }
}

impl WriteRequest {
    /// Create a write request
    pub fn new(variable: WritableVariable, value: Value) -> Self {
        Self { variable, value }
    }

    /// The variable to write
    pub fn variable(&self) -> &WritableVariable {
        &self.variable
    }

    /// The value to write
    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl PartialEq for WriteRequest {
    fn eq(&self, other: &Self) -> bool {
        self.variable == other.variable && self.value.is_identical(&other.value)
    }
}

impl Eq for WriteRequest {}

impl DeviceRequest {
    /// The variable this request targets
    pub fn variable(&self) -> &Arc<VariableNode> {
        match self {
            DeviceRequest::Read(r) => r.variable(),
            DeviceRequest::Write(w) => w.variable().variable(),
        }
    }

    /// Path of the targeted variable
    pub fn path(&self) -> &str {
        self.variable().path_string()
    }
}

impl From<ReadRequest> for DeviceRequest {
    fn from(request: ReadRequest) -> Self {
        DeviceRequest::Read(request)
    }
}

impl From<WriteRequest> for DeviceRequest {
    fn from(request: WriteRequest) -> Self {
        DeviceRequest::Write(request)
    }
}

impl fmt::Debug for ReadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Read({})", self.variable.path_string())
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Write({} = {:?})", self.variable.path_string(), self.value)
    }
}

impl fmt::Debug for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRequest::Read(r) => r.fmt(f),
            DeviceRequest::Write(w) => w.fmt(f),
        }
    }
}
