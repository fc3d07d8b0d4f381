/*!
 * Gateway bootstrap.
 *
 * Builds the tag tree from the configured devices, starts one arbiter per
 * device and wires router, value cache and tag store together.
 */
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{error, info, warn};

use tagbridge_core::config::{Config, Device, DRIVER_OPTION};
use tagbridge_core::error::Error as CoreError;
use tagbridge_core::node::{FolderNode, VariableNode};
use tagbridge_core::utils::with_timeout;
use tagbridge_devices::{Arbiter, ArbiterState, DeviceError, DriverRegistry};

use crate::cache::ValueCache;
use crate::error::Result;
use crate::router::DeviceRouter;
use crate::store::MemoryTagStore;

/// Status of one running device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Device name
    pub name: String,
    /// Driver kind
    pub driver: String,
    /// Arbiter state
    pub state: ArbiterState,
}

/// A running gateway
#[derive(Debug)]
pub struct Gateway {
    root: Arc<FolderNode>,
    router: Arc<DeviceRouter>,
    cache: Arc<ValueCache>,
    store: Arc<MemoryTagStore>,
    disabled: Vec<String>,
    ready_timeout: Duration,
}

impl Gateway {
    /// Start every configured device.
    ///
    /// A device whose driver cannot be created is logged and left out,
    /// the remaining devices start normally. Must be called from within a
    /// tokio runtime.
    pub fn start(config: &Config, registry: &DriverRegistry) -> Result<Self> {
        config.validate()?;

        let root = FolderNode::root();
        let mut arbiters = Vec::new();
        let mut disabled = Vec::new();
        for device in config.devices() {
            let name = device.name().to_string();
            match start_device(&root, registry, device) {
                Ok(arbiter) => arbiters.push(arbiter),
                Err(e) => {
                    error!("Device {} disabled: {}", name, e);
                    disabled.push(name);
                }
            }
        }
        info!(
            "Gateway started with {} device(s), {} disabled",
            arbiters.len(),
            disabled.len()
        );

        let router = Arc::new(DeviceRouter::new(arbiters));
        let store = MemoryTagStore::new();
        let cache = ValueCache::new(router.clone(), store.clone());
        store.bind(&cache);

        Ok(Self {
            root,
            router,
            cache,
            store,
            disabled,
            ready_timeout: config.gateway.ready_timeout(),
        })
    }

    /// Wait until every device has finished initialization.
    ///
    /// Fails with a timeout error when initialization takes longer than the
    /// configured ready timeout.
    pub async fn wait_ready(&self) -> Result<Vec<DeviceStatus>> {
        let arbiters = self.router.arbiters();
        with_timeout(self.ready_timeout, async {
            Ok(join_all(arbiters.iter().map(|a| a.wait_ready())).await)
        })
        .await?;

        let devices = self.devices();
        for device in devices.iter().filter(|d| d.state == ArbiterState::Inactive) {
            warn!("Device {} is inactive", device.name);
        }
        Ok(devices)
    }

    /// The root of the tag tree
    pub fn root(&self) -> &Arc<FolderNode> {
        &self.root
    }

    /// The request router
    pub fn router(&self) -> &Arc<DeviceRouter> {
        &self.router
    }

    /// The value cache
    pub fn cache(&self) -> &Arc<ValueCache> {
        &self.cache
    }

    /// The front-end tag store
    pub fn store(&self) -> &Arc<MemoryTagStore> {
        &self.store
    }

    /// Look up a variable by its full path
    pub fn find_variable(&self, path: &str) -> Result<Arc<VariableNode>> {
        Ok(self.root.find_variable(path)?)
    }

    /// Status of every running device
    pub fn devices(&self) -> Vec<DeviceStatus> {
        self.router
            .arbiters()
            .iter()
            .map(|a| DeviceStatus {
                name: a.device().name().to_string(),
                driver: a.device().driver().to_string(),
                state: a.state(),
            })
            .collect()
    }

    /// Names of configured devices that could not be started
    pub fn disabled(&self) -> &[String] {
        &self.disabled
    }

    /// Stop all devices
    pub async fn shutdown(&self) {
        join_all(self.router.arbiters().iter().map(|a| a.shutdown())).await;
        info!("Gateway stopped");
    }
}

fn start_device(
    root: &Arc<FolderNode>,
    registry: &DriverRegistry,
    device: Device,
) -> Result<Arc<Arbiter>> {
    if device.driver().is_empty() {
        return Err(DeviceError::configuration(format!(
            "Device {} has no {} option",
            device.name(),
            DRIVER_OPTION
        ))
        .into());
    }
    let driver = registry.create(&device)?;
    let folder = root
        .add_folder(device.name())
        .map_err(|e| CoreError::config(format!("Invalid device name {:?}: {}", device.name(), e)))?;
    Ok(Arbiter::spawn(device, folder, driver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use tagbridge_core::config::ConfigBuilder;
    use tagbridge_core::types::StatusCode;

    fn config(toml: &str) -> Config {
        ConfigBuilder::new().with_toml_str(toml).build().unwrap()
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_first_read_is_stale_then_cached() {
        let config = config(
            r#"
            [devices.temp1]
            driver = "test"
            delay = "1000"
            "#,
        );
        let gateway = Gateway::start(&config, &DriverRegistry::with_builtin_drivers()).unwrap();
        let devices = gateway.wait_ready().await.unwrap();
        assert_eq!(devices[0].state, ArbiterState::Active);

        let test = gateway.find_variable("temp1/test").unwrap();
        let first = gateway.cache().read(&test);
        assert_eq!(first.status, StatusCode::BadWaitingForInitialData);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = gateway.cache().read(&test);
        assert!(second.is_good());
        assert_eq!(second, gateway.cache().cached(&test));
        assert!(gateway.store().get("temp1/test").unwrap().is_good());
    }

    #[test_log::test(tokio::test)]
    async fn test_devices_without_driver_are_disabled() {
        let config = config(
            r#"
            [devices.bad]
            driver = "modbus"

            [devices.good]
            driver = "test"
            delay = "0"

            [devices.nodriver]
            delay = "0"
            "#,
        );
        let gateway = Gateway::start(&config, &DriverRegistry::with_builtin_drivers()).unwrap();
        gateway.wait_ready().await.unwrap();

        assert_eq!(gateway.disabled(), ["bad".to_string(), "nodriver".to_string()]);
        let names: Vec<String> = gateway.devices().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["good"]);
        assert!(gateway.root().child("bad").is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_initialization_only_affects_that_device() {
        let config = config(
            r#"
            [devices.chamber]
            driver = "binder_kb"

            [devices.sim]
            driver = "test"
            delay = "0"
            "#,
        );
        let gateway = Gateway::start(&config, &DriverRegistry::with_builtin_drivers()).unwrap();
        let devices = gateway.wait_ready().await.unwrap();

        let states: Vec<(String, ArbiterState)> =
            devices.into_iter().map(|d| (d.name, d.state)).collect();
        assert_eq!(
            states,
            vec![
                ("chamber".to_string(), ArbiterState::Inactive),
                ("sim".to_string(), ArbiterState::Active),
            ]
        );

        let foo = gateway.find_variable("sim/folder/foo").unwrap();
        assert!(gateway.cache().read_through(&foo).await.unwrap().is_good());
    }

    #[test]
    fn test_empty_configuration_is_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let err = Gateway::start(&Config::default(), &DriverRegistry::with_builtin_drivers())
            .unwrap_err();
        assert!(matches!(err, GatewayError::Core(e) if e.is_config()));
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let config = config("[devices.sim]\ndriver = \"test\"\ndelay = \"0\"\n");
        let gateway = Gateway::start(&config, &DriverRegistry::with_builtin_drivers()).unwrap();
        gateway.wait_ready().await.unwrap();

        assert!(gateway.find_variable("sim/nothing").is_err());
        assert!(gateway.find_variable("sim/folder").is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_devices() {
        let config = config("[devices.a]\ndriver = \"test\"\n\n[devices.b]\ndriver = \"test\"\n");
        let gateway = Gateway::start(&config, &DriverRegistry::with_builtin_drivers()).unwrap();
        gateway.wait_ready().await.unwrap();
        gateway.shutdown().await;

        assert!(gateway
            .devices()
            .iter()
            .all(|d| d.state == ArbiterState::Stopped));
    }
}
