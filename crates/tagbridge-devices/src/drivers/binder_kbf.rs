/*!
 * Driver for BINDER KBF series climate chambers.
 *
 * The KBF controller has a small web server. A single GET of
 * `/UE/ZIP/<id>//<id>//...` returns the current value of every requested
 * register as a zlib compressed body of the form
 * `<id>=<Wert>value</Wert>//<id>=...`, so one round trip answers a whole
 * batch. Registers the controller reports as `-----` are unset.
 */
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::read::ZlibDecoder;
use tracing::{debug, trace, warn};

use tagbridge_core::config::Device;
use tagbridge_core::node::{FolderNode, TreeNode, VariableNode};
use tagbridge_core::types::{convert_value, DataType, DataValue, StatusCode};

use crate::driver::{BatchDriver, CompletionSink};
use crate::error::{DeviceError, Result};
use crate::request::{DeviceRequest, ReadRequest};

/// Default timeout for connecting and for the whole fetch, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Marker the controller sends for registers without a value
const UNSET: &str = "-----";

/// Registers exposed by the driver: variable name, data type and id
const REGISTERS: &[(&str, DataType, &str)] = &[
    ("Temperature", DataType::Double, "2.416.1.0.0"),
    ("Temperature Setpoint", DataType::Double, "2.227.0.0.0"),
    ("Humidity", DataType::Double, "2.416.3.0.0"),
    ("Humidity Setpoint", DataType::Double, "2.413.1.0.0"),
    ("Fan Speed Setpoint", DataType::UInt16, "2.227.2.0.0"),
];

/// BINDER KBF chamber driver
#[derive(Debug)]
pub struct BinderKbfDriver {
    device: String,
    url: String,
    timeout: Duration,
    client: Option<reqwest::Client>,
    registers: Vec<(Arc<VariableNode>, &'static str)>,
}

impl BinderKbfDriver {
    /// Driver kind used in configuration
    pub const KIND: &'static str = "binder_kbf";

    /// Create an unconfigured driver
    pub fn new() -> Self {
        Self {
            device: String::new(),
            url: String::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            client: None,
            registers: Vec::new(),
        }
    }

    /// Fetch all registers and return the inflated body
    async fn fetch(&self) -> Result<String> {
        let client = self.client.as_ref().ok_or(DeviceError::NotConnected)?;
        let response = client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| self.request_error(e))?;
        let body = response.bytes().await.map_err(|e| self.request_error(e))?;

        let mut text = String::new();
        ZlibDecoder::new(&body[..]).read_to_string(&mut text)?;
        trace!("[{}]: Response: {}", self.device, text);
        Ok(text)
    }

    fn request_error(&self, e: reqwest::Error) -> DeviceError {
        trace!("[{}]: Error fetching {}: {}", self.device, self.url, e);
        if e.is_connect() {
            DeviceError::NotConnected
        } else if e.is_timeout() {
            DeviceError::Timeout(e.to_string())
        } else {
            DeviceError::communication(e.to_string())
        }
    }

    /// Decode a response into values per variable
    fn parse(&self, text: &str) -> HashMap<Arc<VariableNode>, DataValue> {
        let text = text.replace("<Wert>", "").replace("</Wert>", "");
        let mut values = HashMap::new();
        for pair in text.split("//") {
            let Some((id, raw)) = pair.split_once('=') else {
                continue;
            };
            let id = id.trim();
            match self.registers.iter().find(|(_, register)| *register == id) {
                Some((variable, _)) => {
                    trace!("[{}]: {} = {}", self.device, id, raw);
                    let value = if raw.trim() == UNSET {
                        DataValue::without_value(StatusCode::Good)
                    } else {
                        convert_value(variable.data_type(), raw)
                    };
                    values.insert(variable.clone(), value);
                }
                None => warn!("[{}]: Unknown variable: {}", self.device, id),
            }
        }
        values
    }

    fn answer<F>(sink: &CompletionSink, reads: &[ReadRequest], value: F) -> Result<()>
    where
        F: Fn(&ReadRequest) -> DataValue,
    {
        for read in reads {
            sink.complete_read(read, value(read))?;
        }
        Ok(())
    }
}

impl Default for BinderKbfDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchDriver for BinderKbfDriver {
    async fn initialize(&mut self, device: &Device, folder: &Arc<FolderNode>) -> Result<()> {
        self.device = device.name().to_string();
        let hostname = device.option("hostname")?;
        self.timeout = device.duration_option_ms("timeout", DEFAULT_TIMEOUT_MS)?;
        self.client = Some(
            reqwest::Client::builder()
                .connect_timeout(self.timeout)
                .timeout(self.timeout)
                .build()
                .map_err(|e| DeviceError::driver(format!("Failed to create HTTP client: {}", e)))?,
        );

        let mut ids = Vec::with_capacity(REGISTERS.len());
        for &(name, data_type, id) in REGISTERS {
            let variable = folder.add_variable_read_only(name, data_type)?;
            self.registers.push((variable, id));
            ids.push(id);
        }
        self.url = format!("http://{}/UE/ZIP/{}", hostname, ids.join("//"));
        debug!("[{}]: Polling {}", self.device, self.url);
        Ok(())
    }

    async fn process(&mut self, batch: Vec<DeviceRequest>, sink: &CompletionSink) -> Result<()> {
        let mut reads = Vec::with_capacity(batch.len());
        for request in batch {
            match request {
                DeviceRequest::Read(read) => reads.push(read),
                DeviceRequest::Write(write) => {
                    let path = write.variable().path_string().to_string();
                    sink.fail_write(&write, DeviceError::UnsupportedWrite(path))?;
                }
            }
        }
        if reads.is_empty() {
            return Ok(());
        }

        match self.fetch().await {
            Ok(text) => {
                let values = self.parse(&text);
                Self::answer(sink, &reads, |read| {
                    values
                        .get(read.variable())
                        .cloned()
                        .unwrap_or_else(|| DataValue::bad(StatusCode::Bad))
                })
            }
            Err(e) => {
                let status = match e {
                    DeviceError::NotConnected => StatusCode::BadNoCommunication,
                    _ => StatusCode::BadCommunicationError,
                };
                trace!("[{}]: Error reading from device: {}", self.device, e);
                Self::answer(sink, &reads, |_| DataValue::bad(status))?;
                tokio::time::sleep(self.timeout).await;
                Ok(())
            }
        }
    }
}
