/*!
 * Bookkeeping of requests waiting for a device driver.
 *
 * Every distinct request is stored once, in arrival order, together with
 * the callers waiting for its result. Handles returned to callers resolve
 * when the driver completes the request.
 */
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use tagbridge_core::types::DataValue;

use crate::error::{DeviceError, Result};
use crate::request::{DeviceRequest, ReadRequest, WriteRequest};

/// Outcome delivered to every caller of a coalesced write
pub(crate) type WriteOutcome = std::result::Result<(), Arc<DeviceError>>;

/// Callers waiting for one pending request
pub(crate) enum Waiters {
    Read(Vec<oneshot::Sender<DataValue>>),
    Write(Vec<oneshot::Sender<WriteOutcome>>),
}

/// A request together with everyone waiting for it
pub(crate) struct PendingEntry {
    pub(crate) request: DeviceRequest,
    pub(crate) waiters: Waiters,
}

/// Ordered map from request to waiters
#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Vec<PendingEntry>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of distinct pending requests
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the pending requests in arrival order
    pub(crate) fn snapshot(&self) -> Vec<DeviceRequest> {
        self.entries.iter().map(|e| e.request.clone()).collect()
    }

    fn position(&self, request: &DeviceRequest) -> Option<usize> {
        self.entries.iter().position(|e| &e.request == request)
    }

    /// Attach a waiter to a read, inserting the request if it is new.
    ///
    /// Returns the receiver and whether a new entry was created.
    pub(crate) fn join_read(&mut self, request: ReadRequest) -> (oneshot::Receiver<DataValue>, bool) {
        let (tx, rx) = oneshot::channel();
        let key = DeviceRequest::Read(request);
        match self.position(&key) {
            Some(index) => {
                if let Waiters::Read(waiters) = &mut self.entries[index].waiters {
                    waiters.push(tx);
                }
                (rx, false)
            }
            None => {
                self.entries.push(PendingEntry {
                    request: key,
                    waiters: Waiters::Read(vec![tx]),
                });
                (rx, true)
            }
        }
    }

    /// Attach a waiter to a write, inserting the request if it is new
    pub(crate) fn join_write(&mut self, request: WriteRequest) -> (oneshot::Receiver<WriteOutcome>, bool) {
        let (tx, rx) = oneshot::channel();
        let key = DeviceRequest::Write(request);
        match self.position(&key) {
            Some(index) => {
                if let Waiters::Write(waiters) = &mut self.entries[index].waiters {
                    waiters.push(tx);
                }
                (rx, false)
            }
            None => {
                self.entries.push(PendingEntry {
                    request: key,
                    waiters: Waiters::Write(vec![tx]),
                });
                (rx, true)
            }
        }
    }

    /// Remove a pending request, returning its waiters
    pub(crate) fn take(&mut self, request: &DeviceRequest) -> Option<Waiters> {
        let index = self.position(request)?;
        Some(self.entries.remove(index).waiters)
    }

    /// Remove every pending request
    pub(crate) fn drain(&mut self) -> Vec<PendingEntry> {
        std::mem::take(&mut self.entries)
    }
}

impl Waiters {
    /// Deliver a read result to every waiter
    pub(crate) fn resolve_read(self, value: DataValue) {
        if let Waiters::Read(waiters) = self {
            for tx in waiters {
                // A dropped handle means the caller lost interest
                let _ = tx.send(value.clone());
            }
        }
    }

    /// Deliver a write outcome to every waiter
    pub(crate) fn resolve_write(self, outcome: WriteOutcome) {
        if let Waiters::Write(waiters) = self {
            for tx in waiters {
                let _ = tx.send(outcome.clone());
            }
        }
    }
}

/// Handle to the eventual result of a read.
///
/// Resolves to the value the driver produced, or to
/// [`DeviceError::Abandoned`] when the arbiter stops first.
#[derive(Debug)]
pub struct ReadHandle {
    rx: oneshot::Receiver<DataValue>,
    path: String,
}

/// Handle to the eventual outcome of a write
#[derive(Debug)]
pub struct WriteHandle {
    rx: oneshot::Receiver<WriteOutcome>,
    path: String,
}

impl ReadHandle {
    pub(crate) fn new(rx: oneshot::Receiver<DataValue>, path: &str) -> Self {
        Self {
            rx,
            path: path.to_string(),
        }
    }

    /// A handle that is already resolved
    pub(crate) fn ready(value: DataValue, path: &str) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self::new(rx, path)
    }

    /// A handle whose request will never be answered
    pub(crate) fn abandoned(path: &str) -> Self {
        let (_, rx) = oneshot::channel();
        Self::new(rx, path)
    }

    /// Path of the variable being read
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl WriteHandle {
    pub(crate) fn new(rx: oneshot::Receiver<WriteOutcome>, path: &str) -> Self {
        Self {
            rx,
            path: path.to_string(),
        }
    }

    /// A handle that is already resolved
    pub(crate) fn ready(outcome: WriteOutcome, path: &str) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self::new(rx, path)
    }

    /// A handle whose request will never be answered
    pub(crate) fn abandoned(path: &str) -> Self {
        let (_, rx) = oneshot::channel();
        Self::new(rx, path)
    }

    /// Path of the variable being written
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Future for ReadHandle {
    type Output = Result<DataValue>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| DeviceError::Abandoned(this.path.clone())))
    }
}

impl Future for WriteHandle {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx).poll(cx).map(|received| match received {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(DeviceError::WriteFailed {
                path: this.path.clone(),
                source,
            }),
            Err(_) => Err(DeviceError::Abandoned(this.path.clone())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagbridge_core::node::FolderNode;
    use tagbridge_core::types::{DataType, Value};

    #[test]
    fn test_join_coalesces_equal_requests() {
        let root = FolderNode::root();
        let a = root.add_variable_read_only("a", DataType::Double).unwrap();
        let b = root.add_variable_read_only("b", DataType::Double).unwrap();

        let mut pending = PendingRequests::new();
        let (_rx1, inserted1) = pending.join_read(ReadRequest::new(a.clone()));
        let (_rx2, inserted2) = pending.join_read(ReadRequest::new(b.clone()));
        let (_rx3, inserted3) = pending.join_read(ReadRequest::new(a.clone()));

        assert!(inserted1);
        assert!(inserted2);
        assert!(!inserted3);
        assert_eq!(pending.len(), 2);
        assert_eq!(
            pending.snapshot(),
            vec![
                DeviceRequest::Read(ReadRequest::new(a)),
                DeviceRequest::Read(ReadRequest::new(b)),
            ]
        );
    }

    #[tokio::test]
    async fn test_take_resolves_all_waiters() {
        let root = FolderNode::root();
        let a = root.add_variable_read_only("a", DataType::Double).unwrap();

        let mut pending = PendingRequests::new();
        let (rx1, _) = pending.join_read(ReadRequest::new(a.clone()));
        let (rx2, _) = pending.join_read(ReadRequest::new(a.clone()));

        let waiters = pending
            .take(&DeviceRequest::Read(ReadRequest::new(a.clone())))
            .unwrap();
        waiters.resolve_read(DataValue::good(1.5));
        assert!(pending.is_empty());

        let h1 = ReadHandle::new(rx1, "a");
        let h2 = ReadHandle::new(rx2, "a");
        assert_eq!(h1.await.unwrap().value, Some(Value::Float(1.5)));
        assert_eq!(h2.await.unwrap().value, Some(Value::Float(1.5)));

        assert!(pending.take(&DeviceRequest::Read(ReadRequest::new(a))).is_none());
    }

    #[test]
    fn test_handle_pending_until_resolved() {
        let root = FolderNode::root();
        let a = root.add_variable_read_only("a", DataType::Double).unwrap();

        let mut pending = PendingRequests::new();
        let (rx, _) = pending.join_read(ReadRequest::new(a.clone()));
        let mut handle = tokio_test::task::spawn(ReadHandle::new(rx, "a"));
        tokio_test::assert_pending!(handle.poll());

        pending
            .take(&DeviceRequest::Read(ReadRequest::new(a)))
            .unwrap()
            .resolve_read(DataValue::good(2.0));
        assert!(handle.is_woken());
        let value = tokio_test::assert_ready_ok!(handle.poll());
        assert_eq!(value.value, Some(Value::Float(2.0)));
    }

    #[tokio::test]
    async fn test_dropped_entry_abandons_handles() {
        let root = FolderNode::root();
        let sp = root.add_variable_read_write("sp", DataType::Double).unwrap();

        let mut pending = PendingRequests::new();
        let (rx, _) = pending.join_write(WriteRequest::new(sp, Value::Float(1.0)));
        drop(pending.drain());

        let err = WriteHandle::new(rx, "sp").await.unwrap_err();
        assert!(matches!(err, DeviceError::Abandoned(path) if path == "sp"));
    }

    #[tokio::test]
    async fn test_failed_write_reaches_every_writer() {
        let root = FolderNode::root();
        let sp = root.add_variable_read_write("sp", DataType::Double).unwrap();

        let mut pending = PendingRequests::new();
        let request = WriteRequest::new(sp, Value::Float(1.0));
        let (rx1, _) = pending.join_write(request.clone());
        let (rx2, inserted) = pending.join_write(request.clone());
        assert!(!inserted);

        pending
            .take(&DeviceRequest::Write(request))
            .unwrap()
            .resolve_write(Err(Arc::new(DeviceError::NotConnected)));

        for rx in [rx1, rx2] {
            let err = WriteHandle::new(rx, "sp").await.unwrap_err();
            assert!(matches!(err, DeviceError::WriteFailed { .. }));
        }
    }
}
