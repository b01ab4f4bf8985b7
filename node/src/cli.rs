//! # CLI Interface
//!
//! Command-line structure for `aion-node`, built with `clap` derive. Every
//! flag that matters in deployment has an `AION_*` environment fallback.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// AION vault service node.
///
/// Hosts a pooled-fund vault over the configured yield backends, runs the
/// periodic health check, serves the REST/WebSocket API, and exposes
/// Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "aion-node",
    about = "AION vault service node",
    version,
    propagate_version = true
)]
pub struct AionNodeCli {
    /// Log output format.
    #[arg(long, global = true, value_enum, env = "AION_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the vault service.
    Run(RunArgs),
    /// Write a starter configuration file and generate the owner key.
    Init(InitArgs),
    /// Generate a signing key and print its vault address.
    Keygen(KeygenArgs),
    /// Print the authentication headers for an API request.
    Sign(SignArgs),
    /// Query a running node's `/status` endpoint.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for `run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (JSON).
    #[arg(long, short = 'c', env = "AION_CONFIG", default_value = "aion.json")]
    pub config: PathBuf,

    /// Port for the REST/WebSocket API. Overrides the config file.
    #[arg(long, env = "AION_API_PORT")]
    pub api_port: Option<u16>,

    /// Port for the Prometheus metrics endpoint. Overrides the config file.
    #[arg(long, env = "AION_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Seconds between health checks. Overrides the config file.
    #[arg(long, env = "AION_HEALTH_INTERVAL")]
    pub health_interval: Option<u64>,
}

/// Arguments for `init`.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Where to write the configuration.
    #[arg(long, short = 'c', env = "AION_CONFIG", default_value = "aion.json")]
    pub config: PathBuf,

    /// Where to write the owner key. Defaults to the config path with a
    /// `.key` extension.
    #[arg(long, env = "AION_OWNER_KEY")]
    pub key_file: Option<PathBuf>,

    /// Overwrite existing files.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `keygen`.
#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// Where to write the hex-encoded secret key.
    #[arg(long, short = 'o')]
    pub out: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for `sign`.
#[derive(Parser, Debug)]
pub struct SignArgs {
    /// Key file of the acting address.
    #[arg(long, short = 'k', env = "AION_KEY_FILE")]
    pub key_file: PathBuf,

    /// HTTP method of the request.
    #[arg(long, default_value = "POST")]
    pub method: String,

    /// Request path, e.g. `/admin/pause`.
    #[arg(long)]
    pub path: String,

    /// Exact JSON body that will be sent.
    #[arg(long, default_value = "")]
    pub body: String,
}

/// Arguments for `status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// `host:port` of the node's API.
    #[arg(long, env = "AION_API_ADDR", default_value = "127.0.0.1:9841")]
    pub api_addr: String,
}
