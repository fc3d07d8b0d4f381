/*!
 * Driver for BINDER KB series climate chambers.
 *
 * The chamber controller speaks a line based text protocol over TCP. A read
 * of register `<id>` is the command `CANIDGetValue:<id>`; the controller
 * answers with a line holding the length of the reply followed by the
 * reply itself, which repeats the command before the value. Temperatures
 * are reported in kelvin and published in degrees celsius.
 */
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use tagbridge_core::config::Device;
use tagbridge_core::node::{FolderNode, TreeNode, VariableNode};
use tagbridge_core::types::{convert_value, DataType, DataValue, StatusCode};

use crate::driver::SingleRequestDriver;
use crate::error::{DeviceError, Result};

/// Default TCP port of the controller
pub const DEFAULT_PORT: u16 = 9000;

/// Default timeout for connecting and for each exchange, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

const KELVIN_OFFSET: f64 = 273.15;

/// A published register
#[derive(Debug, Clone, Copy)]
struct Register {
    id: &'static str,
    kelvin: bool,
}

/// Registers exposed by the driver: variable name, data type, CAN id and
/// whether the value is a temperature in kelvin
const REGISTERS: &[(&str, DataType, &str, bool)] = &[
    ("Communication Status", DataType::String, "10010010", false),
    ("Fan Speed", DataType::Double, "112000E1", false),
    ("Temperature Setpoint", DataType::Double, "114000C0", true),
    ("Temperature", DataType::Double, "11400080", true),
    ("Door Temperature", DataType::Double, "11400082", true),
];

/// An open connection to the controller
#[derive(Debug)]
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// BINDER KB chamber driver
#[derive(Debug)]
pub struct BinderKbDriver {
    device: String,
    hostname: String,
    port: u16,
    timeout: Duration,
    registers: HashMap<Arc<VariableNode>, Register>,
    connection: Option<Connection>,
}

impl BinderKbDriver {
    /// Driver kind used in configuration
    pub const KIND: &'static str = "binder_kb";

    /// Create an unconfigured driver
    pub fn new() -> Self {
        Self {
            device: String::new(),
            hostname: String::new(),
            port: DEFAULT_PORT,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            registers: HashMap::new(),
            connection: None,
        }
    }

    /// Connect unless already connected.
    ///
    /// A failed attempt is followed by a cooldown of one timeout period.
    async fn ensure_connected(&mut self) -> bool {
        if self.connection.is_some() {
            return true;
        }

        let address = format!("{}:{}", self.hostname, self.port);
        match timeout(self.timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => {
                debug!("[{}]: Connected to {}", self.device, address);
                let (reader, writer) = stream.into_split();
                self.connection = Some(Connection {
                    reader: BufReader::new(reader),
                    writer,
                });
                true
            }
            Ok(Err(e)) => {
                trace!("[{}]: Error connecting to {}: {}", self.device, address, e);
                self.disconnect().await;
                false
            }
            Err(_) => {
                trace!("[{}]: Timed out connecting to {}", self.device, address);
                self.disconnect().await;
                false
            }
        }
    }

    /// Drop the connection and wait before the next attempt
    async fn disconnect(&mut self) {
        self.connection = None;
        tokio::time::sleep(self.timeout).await;
    }

    /// Send one command and return the payload of the reply
    async fn exchange(&mut self, command: &str) -> Result<String> {
        let connection = self.connection.as_mut().ok_or(DeviceError::NotConnected)?;
        let exchange = async {
            connection
                .writer
                .write_all(format!("{}\r\n", command).as_bytes())
                .await?;
            connection.writer.flush().await?;

            // The first line only carries the length of the second
            let mut line = String::new();
            read_line(&mut connection.reader, &mut line).await?;
            line.clear();
            read_line(&mut connection.reader, &mut line).await?;
            Ok::<String, DeviceError>(line)
        };

        let reply = timeout(self.timeout, exchange)
            .await
            .map_err(|_| DeviceError::Timeout(format!("no reply to {}", command)))??;

        let reply = reply.trim_end_matches(['\r', '\n']);
        reply
            .get(command.len() + 1..)
            .map(str::to_string)
            .ok_or_else(|| DeviceError::protocol(format!("unexpected reply {:?} to {}", reply, command)))
    }
}

impl Default for BinderKbDriver {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>, line: &mut String) -> Result<()> {
    if reader.read_line(line).await? == 0 {
        return Err(DeviceError::communication("connection closed by device"));
    }
    Ok(())
}

fn kelvin_to_celsius(raw: &str) -> Result<String> {
    let kelvin: f64 = raw
        .trim()
        .parse()
        .map_err(|e| DeviceError::protocol(format!("invalid temperature {:?}: {}", raw, e)))?;
    Ok((kelvin - KELVIN_OFFSET).to_string())
}

#[async_trait]
impl SingleRequestDriver for BinderKbDriver {
    async fn initialize(&mut self, device: &Device, folder: &Arc<FolderNode>) -> Result<()> {
        self.device = device.name().to_string();
        self.hostname = device.option("hostname")?.to_string();
        self.port = device.parsed_option("port", DEFAULT_PORT)?;
        self.timeout = device.duration_option_ms("timeout", DEFAULT_TIMEOUT_MS)?;

        for &(name, data_type, id, kelvin) in REGISTERS {
            let variable = folder.add_variable_read_only(name, data_type)?;
            self.registers.insert(variable, Register { id, kelvin });
        }
        Ok(())
    }

    async fn read(&mut self, variable: &Arc<VariableNode>) -> DataValue {
        let Some(register) = self.registers.get(variable).copied() else {
            return DataValue::bad(StatusCode::Bad);
        };
        if !self.ensure_connected().await {
            return DataValue::bad(StatusCode::BadNoCommunication);
        }

        let command = format!("CANIDGetValue:{}", register.id);
        let reply = match self.exchange(&command).await {
            Ok(reply) if register.kelvin => kelvin_to_celsius(&reply),
            other => other,
        };
        match reply {
            Ok(raw) => convert_value(variable.data_type(), &raw),
            Err(e) => {
                trace!("[{}]: Error reading {}: {}", self.device, variable.path_string(), e);
                self.disconnect().await;
                DataValue::bad(StatusCode::BadCommunicationError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagbridge_core::types::Value;
    use tokio::net::TcpListener;

    /// Serve the chamber protocol with fixed register values
    async fn chamber(values: HashMap<&'static str, &'static str>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let command = line.trim_end();
                let id = command.trim_start_matches("CANIDGetValue:");
                let reply = format!("{} {}", command, values.get(id).copied().unwrap_or("?"));
                let framed = format!("{}\r\n{}\r\n", reply.len(), reply);
                if writer.write_all(framed.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        port
    }

    fn device(port: u16, timeout_ms: u64) -> Device {
        let mut options = HashMap::new();
        options.insert("hostname".to_string(), "127.0.0.1".to_string());
        options.insert("port".to_string(), port.to_string());
        options.insert("timeout".to_string(), timeout_ms.to_string());
        Device::new("chamber", BinderKbDriver::KIND, options)
    }

    #[tokio::test]
    async fn test_publishes_registers() {
        let folder = FolderNode::root().add_folder("chamber").unwrap();
        let mut driver = BinderKbDriver::new();
        driver.initialize(&device(9000, 100), &folder).await.unwrap();

        let names: Vec<String> = folder
            .child_variables()
            .iter()
            .map(|v| v.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "Communication Status",
                "Fan Speed",
                "Temperature Setpoint",
                "Temperature",
                "Door Temperature"
            ]
        );
        assert_eq!(
            folder.find_variable("Communication Status").unwrap().data_type(),
            DataType::String
        );
    }

    #[tokio::test]
    async fn test_missing_hostname() {
        let folder = FolderNode::root().add_folder("chamber").unwrap();
        let mut driver = BinderKbDriver::new();
        let device = Device::new("chamber", BinderKbDriver::KIND, HashMap::new());
        let err = driver.initialize(&device, &folder).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_reads_values() {
        let port = chamber(HashMap::from([
            ("11400080", "296.15"),
            ("112000E1", "50"),
            ("10010010", "OK"),
        ]))
        .await;

        let folder = FolderNode::root().add_folder("chamber").unwrap();
        let mut driver = BinderKbDriver::new();
        driver.initialize(&device(port, 1000), &folder).await.unwrap();

        let temperature = driver
            .read(&folder.find_variable("Temperature").unwrap())
            .await;
        let celsius = temperature.value.and_then(|v| v.as_float()).unwrap();
        assert!((celsius - 23.0).abs() < 1e-9);

        let fan = driver.read(&folder.find_variable("Fan Speed").unwrap()).await;
        assert_eq!(fan.value, Some(Value::Float(50.0)));

        let status = driver
            .read(&folder.find_variable("Communication Status").unwrap())
            .await;
        assert_eq!(status.value, Some(Value::from("OK")));
    }

    #[tokio::test]
    async fn test_garbled_temperature_is_a_communication_error() {
        let port = chamber(HashMap::from([("11400082", "warm")])).await;

        let folder = FolderNode::root().add_folder("chamber").unwrap();
        let mut driver = BinderKbDriver::new();
        driver.initialize(&device(port, 20), &folder).await.unwrap();

        let value = driver
            .read(&folder.find_variable("Door Temperature").unwrap())
            .await;
        assert_eq!(value.status, StatusCode::BadCommunicationError);
    }

    #[tokio::test]
    async fn test_unreachable_device() {
        // Bind and drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let folder = FolderNode::root().add_folder("chamber").unwrap();
        let mut driver = BinderKbDriver::new();
        driver.initialize(&device(port, 20), &folder).await.unwrap();

        let value = driver
            .read(&folder.find_variable("Temperature").unwrap())
            .await;
        assert_eq!(value.status, StatusCode::BadNoCommunication);
    }
}
