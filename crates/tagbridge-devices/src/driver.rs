/*!
 * The device driver contract.
 *
 * A driver owns the conversation with one physical device. During
 * initialization it publishes the device's variables into the tag tree,
 * afterwards it is handed batches of pending requests by the arbiter and
 * answers each of them through a [`CompletionSink`].
 *
 * Drivers that can only handle one request at a time implement
 * [`SingleRequestDriver`] and are adapted to the batch contract by
 * [`DeviceDriver`].
 */
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{error, trace};

use tagbridge_core::config::Device;
use tagbridge_core::node::{FolderNode, TreeNode, VariableNode, WritableVariable};
use tagbridge_core::types::{DataValue, StatusCode, Value};

use crate::error::{DeviceError, Result};
use crate::pending::{PendingRequests, Waiters};
use crate::request::{DeviceRequest, ReadRequest, WriteRequest};

/// Completes pending requests on behalf of a driver.
///
/// Completing a request removes it from the pending set and wakes every
/// caller waiting on it. Completing a request that is not pending is an
/// error, it is logged loudly and reported as [`DeviceError::NoPendingRequest`].
#[derive(Clone)]
pub struct CompletionSink {
    device: Arc<str>,
    pending: Arc<Mutex<PendingRequests>>,
}

impl CompletionSink {
    pub(crate) fn new(device: &str, pending: Arc<Mutex<PendingRequests>>) -> Self {
        Self {
            device: Arc::from(device),
            pending,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingRequests> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, request: DeviceRequest) -> Result<Waiters> {
        let taken = self.lock().take(&request);
        taken.ok_or_else(|| {
            error!(
                device = %self.device,
                "Driver completed {:?} which is not pending",
                request
            );
            DeviceError::NoPendingRequest(request.path().to_string())
        })
    }

    /// Answer a read with a value
    pub fn complete_read(&self, request: &ReadRequest, value: DataValue) -> Result<()> {
        trace!(path = request.variable().path_string(), status = %value.status, "Read completed");
        self.take(DeviceRequest::Read(request.clone()))?
            .resolve_read(value);
        Ok(())
    }

    /// Answer a read that failed inside the driver
    pub fn fail_read(&self, request: &ReadRequest) -> Result<()> {
        self.complete_read(request, DataValue::bad(StatusCode::BadInternalError))
    }

    /// Report a write as performed
    pub fn complete_write(&self, request: &WriteRequest) -> Result<()> {
        trace!(path = request.variable().path_string(), "Write completed");
        self.take(DeviceRequest::Write(request.clone()))?
            .resolve_write(Ok(()));
        Ok(())
    }

    /// Report a write as failed
    pub fn fail_write(&self, request: &WriteRequest, cause: DeviceError) -> Result<()> {
        trace!(path = request.variable().path_string(), "Write failed: {}", cause);
        self.take(DeviceRequest::Write(request.clone()))?
            .resolve_write(Err(Arc::new(cause)));
        Ok(())
    }

    /// Number of requests still waiting for an answer
    pub fn pending_len(&self) -> usize {
        self.lock().len()
    }
}

/// A driver that processes batches of requests
#[async_trait]
pub trait BatchDriver: Send {
    /// Connect to the device and publish its variables under `folder`
    async fn initialize(&mut self, device: &Device, folder: &Arc<FolderNode>) -> Result<()>;

    /// Process a batch of requests.
    ///
    /// The driver should answer each request through `sink`. Requests left
    /// unanswered stay pending and are offered again in a later batch.
    async fn process(&mut self, batch: Vec<DeviceRequest>, sink: &CompletionSink) -> Result<()>;
}

/// A driver that answers one request at a time
#[async_trait]
pub trait SingleRequestDriver: Send {
    /// Connect to the device and publish its variables under `folder`
    async fn initialize(&mut self, device: &Device, folder: &Arc<FolderNode>) -> Result<()>;

    /// Read one variable
    async fn read(&mut self, variable: &Arc<VariableNode>) -> DataValue;

    /// Write one variable
    async fn write(&mut self, variable: &WritableVariable, value: &Value) -> Result<()> {
        let _ = value;
        Err(DeviceError::UnsupportedWrite(variable.path_string().to_string()))
    }
}

/// A driver in one of the two supported shapes
pub enum DeviceDriver {
    /// Driver that handles whole batches
    Batch(Box<dyn BatchDriver>),
    /// Driver that handles requests one at a time
    SingleRequest(Box<dyn SingleRequestDriver>),
}

impl DeviceDriver {
    /// Wrap a batch driver
    pub fn batch<D: BatchDriver + 'static>(driver: D) -> Self {
        DeviceDriver::Batch(Box::new(driver))
    }

    /// Wrap a single-request driver
    pub fn single_request<D: SingleRequestDriver + 'static>(driver: D) -> Self {
        DeviceDriver::SingleRequest(Box::new(driver))
    }

    /// Initialize the wrapped driver
    pub async fn initialize(&mut self, device: &Device, folder: &Arc<FolderNode>) -> Result<()> {
        match self {
            DeviceDriver::Batch(driver) => driver.initialize(device, folder).await,
            DeviceDriver::SingleRequest(driver) => driver.initialize(device, folder).await,
        }
    }

    /// Process a batch with the wrapped driver.
    ///
    /// Single-request drivers see the batch in order, one request at a time,
    /// and each answer is completed before the next request is issued.
    pub async fn process(&mut self, batch: Vec<DeviceRequest>, sink: &CompletionSink) -> Result<()> {
        match self {
            DeviceDriver::Batch(driver) => driver.process(batch, sink).await,
            DeviceDriver::SingleRequest(driver) => {
                for request in batch {
                    match request {
                        DeviceRequest::Read(read) => {
                            let value = driver.read(read.variable()).await;
                            sink.complete_read(&read, value)?;
                        }
                        DeviceRequest::Write(write) => {
                            match driver.write(write.variable(), write.value()).await {
                                Ok(()) => sink.complete_write(&write)?,
                                Err(e) => sink.fail_write(&write, e)?,
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for DeviceDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceDriver::Batch(_) => f.write_str("DeviceDriver::Batch"),
            DeviceDriver::SingleRequest(_) => f.write_str("DeviceDriver::SingleRequest"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::{ReadHandle, WriteHandle};
    use std::collections::HashMap;
    use tagbridge_core::types::DataType;

    struct Echo {
        reads: usize,
    }

    #[async_trait]
    impl SingleRequestDriver for Echo {
        async fn initialize(&mut self, _device: &Device, folder: &Arc<FolderNode>) -> Result<()> {
            folder.add_variable_read_only("count", DataType::Int64)?;
            folder.add_variable_read_write("sp", DataType::Double)?;
            Ok(())
        }

        async fn read(&mut self, _variable: &Arc<VariableNode>) -> DataValue {
            self.reads += 1;
            DataValue::good(self.reads as i64)
        }
    }

    #[tokio::test]
    async fn test_single_request_adapter_answers_in_order() {
        let folder = FolderNode::root().add_folder("echo").unwrap();
        let device = Device::new("echo", "echo", HashMap::new());
        let mut driver = DeviceDriver::single_request(Echo { reads: 0 });
        driver.initialize(&device, &folder).await.unwrap();

        let count = folder.find_variable("count").unwrap();
        let sp = folder.find_variable("sp").unwrap().as_writable().unwrap();

        let pending = Arc::new(Mutex::new(PendingRequests::new()));
        let sink = CompletionSink::new("echo", pending.clone());
        let read = ReadRequest::new(count);
        let write = WriteRequest::new(sp, Value::Float(3.0));
        let (read_rx, _) = pending.lock().unwrap().join_read(read.clone());
        let (write_rx, _) = pending.lock().unwrap().join_write(write.clone());

        driver
            .process(vec![read.into(), write.into()], &sink)
            .await
            .unwrap();
        assert_eq!(sink.pending_len(), 0);

        let value = ReadHandle::new(read_rx, "echo/count").await.unwrap();
        assert_eq!(value.value, Some(Value::Integer(1)));

        let err = WriteHandle::new(write_rx, "echo/sp").await.unwrap_err();
        match err {
            DeviceError::WriteFailed { source, .. } => {
                assert!(matches!(*source, DeviceError::UnsupportedWrite(_)))
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test_log::test]
    fn test_completing_unknown_request_is_an_error() {
        let root = FolderNode::root();
        let a = root.add_variable_read_only("a", DataType::Double).unwrap();
        let sp = root.add_variable_read_write("sp", DataType::Double).unwrap();
        let read = ReadRequest::new(a);
        let write = WriteRequest::new(sp, Value::Float(1.0));

        let sink = CompletionSink::new("dev", Arc::new(Mutex::new(PendingRequests::new())));
        let results = [
            ("a", sink.complete_read(&read, DataValue::good(1.0))),
            ("a", sink.fail_read(&read)),
            ("sp", sink.complete_write(&write)),
            ("sp", sink.fail_write(&write, DeviceError::protocol("rejected"))),
        ];
        for (expected, result) in results {
            let err = result.unwrap_err();
            assert!(
                matches!(&err, DeviceError::NoPendingRequest(path) if path == expected),
                "unexpected {:?}",
                err
            );
        }
    }

    #[tokio::test]
    async fn test_fail_read_reports_internal_error() {
        let root = FolderNode::root();
        let a = root.add_variable_read_only("a", DataType::Double).unwrap();

        let pending = Arc::new(Mutex::new(PendingRequests::new()));
        let sink = CompletionSink::new("dev", pending.clone());
        let read = ReadRequest::new(a);
        let (rx, _) = pending.lock().unwrap().join_read(read.clone());

        sink.fail_read(&read).unwrap();
        let value = ReadHandle::new(rx, "a").await.unwrap();
        assert_eq!(value.status, StatusCode::BadInternalError);
    }
}
