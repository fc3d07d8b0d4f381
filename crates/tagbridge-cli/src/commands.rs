/*!
 * Subcommand implementations.
 */
use std::collections::HashMap;
use std::fmt::Write as _;

use anyhow::{bail, Context, Result};
use tracing::info;

use tagbridge_core::config::Config;
use tagbridge_core::node::{FolderNode, Node, TreeNode};
use tagbridge_core::types::DataValue;
use tagbridge_devices::DriverRegistry;
use tagbridge_gateway::Gateway;

/// Start the gateway and wait for all devices to initialize
async fn start(config: &Config, registry: &DriverRegistry) -> Result<Gateway> {
    let gateway = Gateway::start(config, registry).context("Failed to start gateway")?;
    for device in gateway
        .wait_ready()
        .await
        .context("Devices did not finish initializing")?
    {
        info!("Device {} ({}) is {}", device.name, device.driver, device.state);
    }
    Ok(gateway)
}

/// Check the configuration without starting any device
pub fn check(config: &Config, registry: &DriverRegistry) -> Result<()> {
    config.validate()?;

    let mut problems = 0;
    for device in config.devices() {
        if device.driver().is_empty() {
            println!("error  {}: no driver option", device.name());
            problems += 1;
        } else if !registry.contains(device.driver()) {
            println!(
                "error  {}: unknown driver {:?} (known: {})",
                device.name(),
                device.driver(),
                registry.kinds().join(", ")
            );
            problems += 1;
        } else {
            println!("ok     {}", device);
        }
    }

    if problems > 0 {
        bail!("{} device(s) misconfigured", problems);
    }
    Ok(())
}

/// Render the tag tree below `folder`, one node per line
pub fn render_tree(folder: &FolderNode) -> String {
    let mut out = String::new();
    render_folder(folder, 0, &mut out);
    out
}

fn render_folder(folder: &FolderNode, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for child in folder.children() {
        match child {
            Node::Folder(f) => {
                let _ = writeln!(out, "{}{}/", indent, f.name());
                render_folder(&f, depth + 1, out);
            }
            Node::Variable(v) => {
                let access = if v.is_writable() { "rw" } else { "r" };
                let _ = writeln!(out, "{}{} [{}, {}]", indent, v.name(), v.data_type(), access);
            }
        }
    }
}

/// Print the tag tree of all devices
pub async fn tree(config: &Config, registry: &DriverRegistry) -> Result<()> {
    let gateway = start(config, registry).await?;
    print!("{}", render_tree(gateway.root()));
    for device in gateway.disabled() {
        println!("# {} disabled", device);
    }
    gateway.shutdown().await;
    Ok(())
}

/// Read one tag and print it as JSON
pub async fn read(config: &Config, registry: &DriverRegistry, path: &str) -> Result<()> {
    let gateway = start(config, registry).await?;
    let result = async {
        let variable = gateway.find_variable(path)?;
        let value = gateway.cache().read_through(&variable).await?;
        println!("{}", serde_json::to_string_pretty(&value)?);
        Ok::<(), anyhow::Error>(())
    }
    .await;
    gateway.shutdown().await;
    result
}

/// Keep all tags refreshed until Ctrl-C, logging every change
pub async fn run(config: &Config, registry: &DriverRegistry) -> Result<()> {
    let gateway = start(config, registry).await?;
    let variables = gateway.root().walk_variables();
    info!("Polling {} tag(s) every {:?}", variables.len(), config.gateway.poll_interval());

    let mut last: HashMap<String, DataValue> = HashMap::new();
    let mut interval = tokio::time::interval(config.gateway.poll_interval());
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
            _ = interval.tick() => {
                for variable in &variables {
                    let value = gateway.cache().read(variable);
                    let path = variable.path_string();
                    let changed = last
                        .get(path)
                        .map_or(true, |prev| prev.value != value.value || prev.status != value.status);
                    if changed {
                        match &value.value {
                            Some(v) => info!("{} = {} ({})", path, v, value.status),
                            None => info!("{} ({})", path, value.status),
                        }
                        last.insert(path.to_string(), value);
                    }
                }
            }
        }
    }

    gateway.shutdown().await;
    Ok(())
}
