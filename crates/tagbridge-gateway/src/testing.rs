//! Test fixtures shared by the gateway modules.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tagbridge_core::config::{ConfigBuilder, Device};
use tagbridge_core::node::FolderNode;
use tagbridge_core::types::{DataType, DataValue};
use tagbridge_devices::{
    BatchDriver, CompletionSink, DeviceDriver, DeviceError, DeviceRequest, DriverRegistry,
};

use crate::service::Gateway;

/// Every request a recorder driver has been asked to process
pub(crate) type RequestLog = Arc<Mutex<Vec<DeviceRequest>>>;

/// Driver publishing `value` and a writable `setpoint`, logging every request
pub(crate) struct Recorder {
    log: RequestLog,
    setpoint: f64,
}

impl Recorder {
    pub(crate) const KIND: &'static str = "recorder";
}

#[async_trait]
impl BatchDriver for Recorder {
    async fn initialize(&mut self, _device: &Device, folder: &Arc<FolderNode>) -> tagbridge_devices::Result<()> {
        folder.add_variable_read_only("value", DataType::Double)?;
        folder.add_variable_read_write("setpoint", DataType::Double)?;
        Ok(())
    }

    async fn process(
        &mut self,
        batch: Vec<DeviceRequest>,
        sink: &CompletionSink,
    ) -> tagbridge_devices::Result<()> {
        for request in batch {
            self.log.lock().unwrap().push(request.clone());
            match request {
                DeviceRequest::Read(read) => {
                    let value = if read.variable().is_writable() {
                        self.setpoint
                    } else {
                        1.0
                    };
                    sink.complete_read(&read, DataValue::good(value))?;
                }
                DeviceRequest::Write(write) => match write.value().as_float() {
                    Some(v) if v >= 0.0 => {
                        self.setpoint = v;
                        sink.complete_write(&write)?;
                    }
                    _ => sink.fail_write(&write, DeviceError::protocol("setpoint out of range"))?,
                },
            }
        }
        Ok(())
    }
}

/// Registry holding the recorder driver, all instances sharing `log`
pub(crate) fn recorder_registry(log: &RequestLog) -> DriverRegistry {
    let mut registry = DriverRegistry::with_builtin_drivers();
    let log = log.clone();
    registry.register(Recorder::KIND, move || {
        DeviceDriver::batch(Recorder {
            log: log.clone(),
            setpoint: 0.0,
        })
    });
    registry
}

/// A started gateway with one recorder device per name
pub(crate) async fn recorder_gateway(devices: &[&str]) -> (Gateway, RequestLog) {
    let toml: String = devices
        .iter()
        .map(|name| format!("[devices.{}]\ndriver = \"{}\"\n", name, Recorder::KIND))
        .collect();
    let config = ConfigBuilder::new().with_toml_str(toml).build().unwrap();

    let log = RequestLog::default();
    let gateway = Gateway::start(&config, &recorder_registry(&log)).unwrap();
    gateway.wait_ready().await.unwrap();
    (gateway, log)
}
