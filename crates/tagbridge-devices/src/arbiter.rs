/*!
 * The per-device request arbiter.
 *
 * Each device is served by exactly one arbiter. Callers hand it reads and
 * writes from any task; equal requests are coalesced so the device sees
 * each distinct request once, and a single worker task feeds the pending
 * requests to the driver in arrival order. The driver is never asked to
 * process two batches at once.
 */
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use tagbridge_core::config::Device;
use tagbridge_core::logging::device_span;
use tagbridge_core::node::{FolderNode, TreeNode, VariableNode, WritableVariable};
use tagbridge_core::types::{DataValue, StatusCode, Value};

use crate::driver::{CompletionSink, DeviceDriver};
use crate::error::DeviceError;
use crate::pending::{PendingRequests, ReadHandle, Waiters, WriteHandle};
use crate::request::{ReadRequest, WriteRequest};

/// Lifecycle state of an arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    /// The driver is being initialized, requests are queued
    Initializing,
    /// The driver is serving requests
    Active,
    /// Initialization failed, requests are answered without the driver
    Inactive,
    /// The arbiter was shut down
    Stopped,
}

impl std::fmt::Display for ArbiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// State shared between the arbiter handle and its worker
struct Shared {
    device: Device,
    pending: Arc<Mutex<PendingRequests>>,
    wake: Notify,
    state: watch::Sender<ArbiterState>,
    stopping: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PendingRequests> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ArbiterState {
        *self.state.borrow()
    }

    fn activate(&self) {
        let _guard = self.lock();
        if self.state() == ArbiterState::Initializing {
            self.state.send_replace(ArbiterState::Active);
        }
    }

    /// Mark the device inactive and answer everything that queued up
    /// while it was initializing.
    fn deactivate(&self) {
        let drained = {
            let mut pending = self.lock();
            self.state.send_replace(ArbiterState::Inactive);
            pending.drain()
        };
        let inactive = Arc::new(DeviceError::DeviceInactive(self.device.name().to_string()));
        for entry in drained {
            match entry.waiters {
                waiters @ Waiters::Read(_) => {
                    waiters.resolve_read(DataValue::bad(StatusCode::BadNoCommunication))
                }
                waiters @ Waiters::Write(_) => waiters.resolve_write(Err(inactive.clone())),
            }
        }
    }

    /// Stop serving requests, abandoning everything still pending
    fn stop(&self) -> usize {
        let drained = {
            let mut pending = self.lock();
            self.state.send_replace(ArbiterState::Stopped);
            pending.drain()
        };
        drained.len()
    }
}

/// Serializes access to one device.
///
/// Created with [`Arbiter::spawn`], which starts the worker task on the
/// current tokio runtime. Dropping the arbiter stops the worker.
pub struct Arbiter {
    shared: Arc<Shared>,
    folder: Arc<FolderNode>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Arbiter {
    /// Start an arbiter for `device`.
    ///
    /// The driver is initialized on the worker task and publishes its
    /// variables under `folder`. Requests issued before initialization
    /// finishes are queued.
    pub fn spawn(device: Device, folder: Arc<FolderNode>, driver: DeviceDriver) -> Arc<Self> {
        let (state, _) = watch::channel(ArbiterState::Initializing);
        let shared = Arc::new(Shared {
            device,
            pending: Arc::new(Mutex::new(PendingRequests::new())),
            wake: Notify::new(),
            state,
            stopping: AtomicBool::new(false),
        });

        let span = device_span(shared.device.name(), shared.device.driver());
        let worker = tokio::spawn(run(shared.clone(), folder.clone(), driver).instrument(span));

        Arc::new(Self {
            shared,
            folder,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// The device served by this arbiter
    pub fn device(&self) -> &Device {
        &self.shared.device
    }

    /// The folder holding the device's variables
    pub fn folder(&self) -> &Arc<FolderNode> {
        &self.folder
    }

    /// Current lifecycle state
    pub fn state(&self) -> ArbiterState {
        self.shared.state()
    }

    /// Wait until initialization has finished, one way or the other
    pub async fn wait_ready(&self) -> ArbiterState {
        let mut rx = self.shared.state.subscribe();
        let ready = rx
            .wait_for(|state| *state != ArbiterState::Initializing)
            .await
            .map(|state| *state);
        ready.unwrap_or_else(|_| self.state())
    }

    /// Number of distinct requests waiting for the driver
    pub fn pending_len(&self) -> usize {
        self.shared.lock().len()
    }

    /// Request the current value of a variable.
    ///
    /// A read equal to one already pending joins it instead of reaching
    /// the device again. Inactive devices answer immediately with
    /// [`StatusCode::BadNoCommunication`].
    pub fn read(&self, variable: Arc<VariableNode>) -> ReadHandle {
        let path = variable.path_string().to_string();
        let rx = {
            let mut pending = self.shared.lock();
            match self.shared.state() {
                ArbiterState::Inactive => {
                    return ReadHandle::ready(DataValue::bad(StatusCode::BadNoCommunication), &path)
                }
                ArbiterState::Stopped => return ReadHandle::abandoned(&path),
                ArbiterState::Initializing | ArbiterState::Active => {}
            }
            let (rx, inserted) = pending.join_read(ReadRequest::new(variable));
            debug!(path = %path, coalesced = !inserted, "Read queued");
            rx
        };
        self.shared.wake.notify_one();
        ReadHandle::new(rx, &path)
    }

    /// Request a write of `value` to a variable.
    ///
    /// Writes of the same value to the same variable are coalesced; all
    /// writers see the same outcome.
    pub fn write(&self, variable: WritableVariable, value: Value) -> WriteHandle {
        let path = variable.path_string().to_string();
        let rx = {
            let mut pending = self.shared.lock();
            match self.shared.state() {
                ArbiterState::Inactive => {
                    let inactive = DeviceError::DeviceInactive(self.shared.device.name().to_string());
                    return WriteHandle::ready(Err(Arc::new(inactive)), &path);
                }
                ArbiterState::Stopped => return WriteHandle::abandoned(&path),
                ArbiterState::Initializing | ArbiterState::Active => {}
            }
            let (rx, inserted) = pending.join_write(WriteRequest::new(variable, value));
            debug!(path = %path, coalesced = !inserted, "Write queued");
            rx
        };
        self.shared.wake.notify_one();
        WriteHandle::new(rx, &path)
    }

    /// Stop the worker once the batch in progress has been processed.
    ///
    /// Requests still pending afterwards resolve as abandoned.
    pub async fn shutdown(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };

        self.shared.stopping.store(true, Ordering::Release);
        self.shared.wake.notify_one();
        if let Err(e) = worker.await {
            warn!(device = %self.shared.device, "Device worker ended abnormally: {}", e);
        }

        let abandoned = self.shared.stop();
        info!(device = %self.shared.device, abandoned, "Device arbiter stopped");
    }
}

impl Drop for Arbiter {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.abort();
            self.shared.stop();
        }
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter")
            .field("device", &self.shared.device)
            .field("state", &self.state())
            .field("pending", &self.pending_len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// The worker loop.
///
/// Waits for a signal while nothing is pending, otherwise hands a snapshot
/// of the pending requests to the driver. Requests the driver leaves
/// unanswered are offered again. After a failed batch the worker waits for
/// the next signal before retrying.
async fn run(shared: Arc<Shared>, folder: Arc<FolderNode>, mut driver: DeviceDriver) {
    info!("Initializing device {}", shared.device);

    let initialized = AssertUnwindSafe(driver.initialize(&shared.device, &folder))
        .catch_unwind()
        .await;
    match initialized {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Device {} failed to initialize: {}", shared.device, e);
            shared.deactivate();
            return;
        }
        Err(payload) => {
            error!(
                "Driver of {} panicked during initialization: {}",
                shared.device,
                panic_message(payload.as_ref())
            );
            shared.deactivate();
            return;
        }
    }

    shared.activate();
    info!(
        "Device {} active with {} variables",
        shared.device,
        folder.walk_variables().len()
    );

    let sink = CompletionSink::new(shared.device.name(), shared.pending.clone());
    while !shared.stopping.load(Ordering::Acquire) {
        let batch = shared.lock().snapshot();
        if batch.is_empty() {
            shared.wake.notified().await;
            continue;
        }

        debug!(requests = batch.len(), "Processing batch");
        let processed = AssertUnwindSafe(driver.process(batch, &sink))
            .catch_unwind()
            .await;
        match processed {
            Ok(Ok(())) => {
                // Let callers run before unanswered requests are offered again
                tokio::task::yield_now().await;
            }
            Ok(Err(e)) => {
                error!("Driver of {} failed to process a batch: {}", shared.device, e);
                shared.wake.notified().await;
            }
            Err(payload) => {
                error!(
                    "Driver of {} panicked while processing a batch: {}",
                    shared.device,
                    panic_message(payload.as_ref())
                );
                shared.wake.notified().await;
            }
        }
    }
}
