/*!
 * Command line arguments.
 */
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// TagBridge - industrial protocol gateway
///
/// Polls the configured field devices and exposes their values through a
/// single tag tree.
#[derive(Parser, Debug)]
#[command(
    name = "tagbridge",
    version = tagbridge_core::VERSION,
    about = "Industrial protocol gateway exposing device values as a tag tree",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TAGBRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, overrides the configured level (trace, debug, info, warn, error)
    #[arg(short, long, env = "TAGBRIDGE_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the gateway and keep every tag refreshed until Ctrl-C
    Run,

    /// Start the devices and print the tag tree
    Tree,

    /// Read one tag from its device and print it as JSON
    Read {
        /// Tag path, e.g. `temp1/folder/foo`
        path: String,
    },

    /// Validate the configuration without starting any device
    Check,
}
