/*!
 * Read-through / write-through value cache.
 *
 * Front ends expect tag reads to answer immediately, devices answer when
 * they get around to it. The cache bridges the two: a read returns the last
 * known value at once and asks the device for a fresh one in the
 * background, a write is forwarded to the device and its outcome awaited.
 *
 * Every write bumps the generation of its variable, once when it is issued
 * and once when it is stored. A refresh only lands if the generation it
 * started under is still current, so a reading taken before a write can
 * never replace the written value.
 */
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, warn, Instrument};

use tagbridge_core::logging::operation_span;
use tagbridge_core::node::{TreeNode, VariableNode};
use tagbridge_core::types::{DataValue, Value};
use tagbridge_core::utils::{block_on, spawn_and_log};

use crate::error::{GatewayError, Result};
use crate::router::DeviceRouter;
use crate::store::TagStore;

/// Cached state of one variable
#[derive(Debug, Default)]
struct Entry {
    value: Option<DataValue>,
    generation: u64,
}

#[derive(Debug, Default)]
struct Entries(HashMap<Arc<VariableNode>, Entry>);

impl Entries {
    fn value(&self, variable: &Arc<VariableNode>) -> Option<DataValue> {
        self.0.get(variable).and_then(|entry| entry.value.clone())
    }

    fn generation(&self, variable: &Arc<VariableNode>) -> u64 {
        self.0.get(variable).map_or(0, |entry| entry.generation)
    }

    /// Invalidate refreshes started before now
    fn bump(&mut self, variable: &Arc<VariableNode>) {
        self.0.entry(variable.clone()).or_default().generation += 1;
    }

    /// Store a device reading unless a write happened since `generation`
    fn refresh(
        &mut self,
        variable: &Arc<VariableNode>,
        generation: u64,
        value: DataValue,
    ) -> bool {
        let entry = self.0.entry(variable.clone()).or_default();
        if entry.generation != generation {
            return false;
        }
        entry.value = Some(value);
        true
    }

    /// Store a written value
    fn written(&mut self, variable: &Arc<VariableNode>, value: DataValue) {
        let entry = self.0.entry(variable.clone()).or_default();
        entry.generation += 1;
        entry.value = Some(value);
    }
}

type Values = Arc<Mutex<Entries>>;

fn lock(values: &Values) -> MutexGuard<'_, Entries> {
    values.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Store a device reading and forward it to the tag store, unless it went
/// stale while it was being read
fn land(
    values: &Values,
    store: &dyn TagStore,
    variable: &Arc<VariableNode>,
    generation: u64,
    value: DataValue,
) {
    let mut entries = lock(values);
    if entries.refresh(variable, generation, value.clone()) {
        // Under the lock, the store sees updates in cache order
        store.refresh(variable, value);
    } else {
        debug!("Dropped stale reading of {}", variable.path_string());
    }
}

/// Value cache in front of the device arbiters
pub struct ValueCache {
    router: Arc<DeviceRouter>,
    store: Arc<dyn TagStore>,
    values: Values,
    runtime: Handle,
}

impl ValueCache {
    /// Create a cache forwarding device readings to `store`.
    ///
    /// Must be called from within a tokio runtime; background refreshes
    /// are spawned onto it.
    pub fn new(router: Arc<DeviceRouter>, store: Arc<dyn TagStore>) -> Arc<Self> {
        Arc::new(Self {
            router,
            store,
            values: Values::default(),
            runtime: Handle::current(),
        })
    }

    /// The last known value of a variable, without contacting the device
    pub fn cached(&self, variable: &Arc<VariableNode>) -> DataValue {
        lock(&self.values)
            .value(variable)
            .unwrap_or_else(DataValue::waiting_for_initial_data)
    }

    /// Return the last known value and refresh it in the background.
    ///
    /// Before the first reading completes the value has status
    /// `BadWaitingForInitialData`. The fresh reading is stored here and
    /// pushed to the tag store through its refresh path, unless a write to
    /// the variable completed in the meantime.
    pub fn read(&self, variable: &Arc<VariableNode>) -> DataValue {
        let (current, generation) = {
            let entries = lock(&self.values);
            (entries.value(variable), entries.generation(variable))
        };
        let current = current.unwrap_or_else(DataValue::waiting_for_initial_data);
        match self.router.read(variable.clone()) {
            Ok(handle) => {
                let variable = variable.clone();
                let values = self.values.clone();
                let store = self.store.clone();
                let span = operation_span("refresh", variable.path_string());
                let refresh = async move {
                    let value = handle.await?;
                    land(&values, store.as_ref(), &variable, generation, value);
                    Ok::<(), GatewayError>(())
                };

                let _runtime = self.runtime.enter();
                spawn_and_log("refresh", refresh.instrument(span));
            }
            Err(e) => warn!("Cannot refresh {}: {}", variable.path_string(), e),
        }
        current
    }

    /// Read a fresh value from the device, waiting for it
    pub async fn read_through(&self, variable: &Arc<VariableNode>) -> Result<DataValue> {
        let generation = lock(&self.values).generation(variable);
        let value = self.router.read(variable.clone())?.await?;
        land(&self.values, self.store.as_ref(), variable, generation, value.clone());
        Ok(value)
    }

    /// Blocking variant of [`ValueCache::read_through`] for callers outside
    /// the async runtime
    pub fn read_sync(&self, variable: &Arc<VariableNode>) -> Result<DataValue> {
        block_on(self.read_through(variable))
    }

    /// Write a value to the device and wait for the outcome.
    ///
    /// Read-only variables are rejected without contacting the device.
    pub async fn write(&self, variable: &Arc<VariableNode>, value: Value) -> Result<()> {
        let writable = variable
            .as_writable()
            .ok_or_else(|| GatewayError::NotWritable(variable.path_string().to_string()))?;

        async {
            debug!("Writing {}", value);
            lock(&self.values).bump(variable);
            self.router.write(writable, value.clone())?.await?;
            let written = DataValue::good(value);
            {
                let mut entries = lock(&self.values);
                entries.written(variable, written.clone());
                self.store.refresh(variable, written);
            }
            Ok::<(), GatewayError>(())
        }
        .instrument(operation_span("write", variable.path_string()))
        .await
    }

    /// Blocking variant of [`ValueCache::write`] for callers outside the
    /// async runtime
    pub fn write_sync(&self, variable: &Arc<VariableNode>, value: Value) -> Result<()> {
        block_on(self.write(variable, value))
    }
}

impl std::fmt::Debug for ValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCache")
            .field("router", &self.router)
            .field("cached", &lock(&self.values).0.len())
            .finish()
    }
}
