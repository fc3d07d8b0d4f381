use std::time::Duration;

use tagbridge_devices::DriverRegistry;
use tagbridge_gateway::prelude::{ConfigBuilder, TreeNode, Value};
use tagbridge_gateway::{Gateway, TagStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tagbridge_gateway::prelude::init_logging("info")?;

    // Two simulated devices answering after 200ms
    let config = ConfigBuilder::new()
        .with_toml_str(
            r#"
            [devices.oven]
            driver = "test"
            delay = "200"

            [devices.freezer]
            driver = "test"
            delay = "200"
            "#,
        )
        .build()?;

    let gateway = Gateway::start(&config, &DriverRegistry::with_builtin_drivers())?;
    for device in gateway.wait_ready().await? {
        println!("{} ({}): {}", device.name, device.driver, device.state);
    }

    // First reads return BadWaitingForInitialData and start a refresh
    let variables = gateway.root().walk_variables();
    for variable in &variables {
        let value = gateway.cache().read(variable);
        println!("{:<20} {}", variable.path_string(), value.status);
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    for variable in &variables {
        let value = gateway.cache().cached(variable);
        match value.value {
            Some(v) => println!("{:<20} {}", variable.path_string(), v),
            None => println!("{:<20} {}", variable.path_string(), value.status),
        }
    }

    // A client write goes through the store to the device
    let setpoint = gateway.find_variable("oven/setpoint")?;
    gateway
        .store()
        .client_write(&setpoint, Value::Float(180.0))
        .await?;
    println!("oven/setpoint = {:?}", gateway.store().get("oven/setpoint"));

    gateway.shutdown().await;
    Ok(())
}
