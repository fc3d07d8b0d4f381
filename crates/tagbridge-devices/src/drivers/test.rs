/*!
 * Simulated device for trying out a gateway without hardware.
 *
 * Publishes three read-only doubles that answer with random values after a
 * configurable delay, plus a writable setpoint that echoes back the last
 * value written.
 */
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use tagbridge_core::config::Device;
use tagbridge_core::node::{FolderNode, TreeNode, VariableNode, WritableVariable};
use tagbridge_core::types::{DataType, DataValue, StatusCode, Value};

use crate::driver::SingleRequestDriver;
use crate::error::{DeviceError, Result};

/// Default response delay in milliseconds
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Simulated device with random readings
#[derive(Debug)]
pub struct TestDriver {
    delay: Duration,
    setpoint: Option<WritableVariable>,
    setpoint_value: f64,
}

impl TestDriver {
    /// Driver kind used in configuration
    pub const KIND: &'static str = "test";

    /// Create an uninitialized driver
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            setpoint: None,
            setpoint_value: 0.0,
        }
    }

    fn is_setpoint(&self, variable: &VariableNode) -> bool {
        self.setpoint.as_ref().is_some_and(|sp| **sp == *variable)
    }
}

impl Default for TestDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SingleRequestDriver for TestDriver {
    async fn initialize(&mut self, device: &Device, folder: &Arc<FolderNode>) -> Result<()> {
        self.delay = device.duration_option_ms("delay", DEFAULT_DELAY_MS)?;

        folder.add_variable_read_only("test", DataType::Double)?;
        let sub = folder.add_folder("folder")?;
        sub.add_variable_read_only("foo", DataType::Double)?;
        sub.add_variable_read_only("bar", DataType::Double)?;
        self.setpoint = Some(folder.add_variable_read_write("setpoint", DataType::Double)?);

        debug!("Test device {} answers after {:?}", device.name(), self.delay);
        Ok(())
    }

    async fn read(&mut self, variable: &Arc<VariableNode>) -> DataValue {
        tokio::time::sleep(self.delay).await;
        if self.is_setpoint(variable) {
            return DataValue::good(self.setpoint_value);
        }
        match variable.data_type() {
            DataType::Double => DataValue::good(rand::random::<f64>()),
            _ => DataValue::bad(StatusCode::Bad),
        }
    }

    async fn write(&mut self, variable: &WritableVariable, value: &Value) -> Result<()> {
        if !self.is_setpoint(variable) {
            return Err(DeviceError::UnsupportedWrite(variable.path_string().to_string()));
        }
        let number = value.as_float().ok_or_else(|| {
            DeviceError::protocol(format!("{} expects a number, got {}", variable.path_string(), value))
        })?;
        tokio::time::sleep(self.delay).await;
        self.setpoint_value = number;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn device(delay: &str) -> Device {
        let mut options = HashMap::new();
        options.insert("delay".to_string(), delay.to_string());
        Device::new("sim", TestDriver::KIND, options)
    }

    #[tokio::test]
    async fn test_publishes_variables() {
        let folder = FolderNode::root().add_folder("sim").unwrap();
        let mut driver = TestDriver::new();
        driver.initialize(&device("0"), &folder).await.unwrap();

        let paths: Vec<String> = folder
            .walk_variables()
            .iter()
            .map(|v| v.path_string().to_string())
            .collect();
        assert_eq!(
            paths,
            vec!["sim/test", "sim/folder/foo", "sim/folder/bar", "sim/setpoint"]
        );
        assert!(folder.find_variable("setpoint").unwrap().is_writable());
        assert!(!folder.find_variable("test").unwrap().is_writable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_waits_for_delay() {
        let folder = FolderNode::root().add_folder("sim").unwrap();
        let mut driver = TestDriver::new();
        driver.initialize(&device("250"), &folder).await.unwrap();

        let foo = folder.find_variable("folder/foo").unwrap();
        let started = tokio::time::Instant::now();
        let value = driver.read(&foo).await;
        assert!(started.elapsed() >= Duration::from_millis(250));

        let number = value.value.and_then(|v| v.as_float()).unwrap();
        assert!((0.0..1.0).contains(&number));
    }

    #[tokio::test]
    async fn test_setpoint_round_trip() {
        let folder = FolderNode::root().add_folder("sim").unwrap();
        let mut driver = TestDriver::new();
        driver.initialize(&device("0"), &folder).await.unwrap();

        let setpoint = folder.find_variable("setpoint").unwrap();
        let writable = setpoint.as_writable().unwrap();
        driver.write(&writable, &Value::Float(42.5)).await.unwrap();
        assert_eq!(driver.read(&setpoint).await.value, Some(Value::Float(42.5)));

        let err = driver.write(&writable, &Value::from("warm")).await.unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_invalid_delay_is_a_configuration_error() {
        let folder = FolderNode::root().add_folder("sim").unwrap();
        let mut driver = TestDriver::new();
        let err = driver.initialize(&device("soon"), &folder).await.unwrap_err();
        assert!(err.is_configuration());
    }
}
