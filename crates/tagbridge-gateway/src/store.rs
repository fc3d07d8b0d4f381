/*!
 * Front-end tag stores.
 *
 * A front end keeps its own copy of every tag value. Values reach it along
 * two separate paths: device readings arrive through [`TagStore::refresh`]
 * and are only recorded, client writes arrive through
 * [`TagStore::client_write`] and are forwarded to the device. Keeping the
 * paths apart means recording a device reading can never be mistaken for a
 * client write and echoed back to the device.
 */
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use async_trait::async_trait;
use tracing::trace;

use tagbridge_core::error::Error as CoreError;
use tagbridge_core::node::{TreeNode, VariableNode};
use tagbridge_core::types::{DataValue, Value};

use crate::cache::ValueCache;
use crate::error::Result;

/// The value store of a front end
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Record a value read from a device. Never reaches a device.
    fn refresh(&self, variable: &VariableNode, value: DataValue);

    /// Apply a write issued by a client, forwarding it to the device
    async fn client_write(&self, variable: &Arc<VariableNode>, value: Value) -> Result<()>;
}

/// In-process tag store keyed by tag path
#[derive(Debug, Default)]
pub struct MemoryTagStore {
    values: Mutex<HashMap<String, DataValue>>,
    cache: OnceLock<Weak<ValueCache>>,
}

impl MemoryTagStore {
    /// Create an empty store
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect the store to the cache client writes are forwarded to.
    ///
    /// Only the first call has an effect.
    pub fn bind(&self, cache: &Arc<ValueCache>) {
        let _ = self.cache.set(Arc::downgrade(cache));
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DataValue>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The stored value of a tag
    pub fn get(&self, path: &str) -> Option<DataValue> {
        self.lock().get(path).cloned()
    }

    /// All stored values ordered by path
    pub fn snapshot(&self) -> BTreeMap<String, DataValue> {
        self.lock()
            .iter()
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect()
    }

    /// Number of tags holding a value
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no tag holds a value yet
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl TagStore for MemoryTagStore {
    fn refresh(&self, variable: &VariableNode, value: DataValue) {
        trace!(path = variable.path_string(), status = %value.status, "Tag refreshed");
        self.lock().insert(variable.path_string().to_string(), value);
    }

    async fn client_write(&self, variable: &Arc<VariableNode>, value: Value) -> Result<()> {
        let cache = self
            .cache
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| CoreError::runtime("Tag store is not bound to a value cache"))?;
        cache.write(variable, value).await
    }
}
