// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # AION Vault Node
//!
//! Entry point for the `aion-node` binary. Parses CLI arguments, initializes
//! logging and metrics, builds the vault from its configuration file, runs
//! the periodic health check, and serves the HTTP/WS API.
//!
//! - `run`     — start the service
//! - `init`    — write a starter configuration and the owner key
//! - `keygen`  — generate a signing key for a depositor or guardian
//! - `sign`    — print authentication headers for an API request
//! - `status`  — query a running node's `/status` endpoint
//! - `version` — print build version information

mod api;
mod auth;
mod cli;
mod config;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;

use aion_vault::Vault;

use cli::{AionNodeCli, Commands};
use config::NodeConfig;
use logging::LogFormat;
use metrics::{SharedMetrics, VaultMetrics};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = AionNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args, cli.log_format).await,
        Commands::Init(args) => init_node(args, cli.log_format),
        Commands::Keygen(args) => generate_key(args),
        Commands::Sign(args) => sign_request(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Builds the vault and serves it until a shutdown signal arrives.
async fn run_node(args: cli::RunArgs, log_format: LogFormat) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, log_format);

    let mut config = NodeConfig::load(&args.config)?;
    if let Some(port) = args.api_port {
        config.api_port = port;
    }
    if let Some(port) = args.metrics_port {
        config.metrics_port = port;
    }
    if let Some(secs) = args.health_interval {
        config.health_check_interval_secs = secs;
    }
    config.validate()?;

    tracing::info!(
        config = %args.config.display(),
        owner = %config.owner,
        adapters = config.adapters.len(),
        api_port = config.api_port,
        metrics_port = config.metrics_port,
        "starting aion-node"
    );

    // --- Vault ---
    let vault = Arc::new(config.build_vault()?);
    let node_metrics: SharedMetrics =
        Arc::new(VaultMetrics::new().context("failed to create metrics registry")?);
    node_metrics.refresh(&vault.stats());

    // --- Event forwarding ---
    let event_loop = tokio::spawn(forward_events(Arc::clone(&vault), Arc::clone(&node_metrics)));

    // --- Health check loop ---
    let health_loop = tokio::spawn(run_health_checks(
        Arc::clone(&vault),
        Arc::clone(&node_metrics),
        Duration::from_secs(config.health_check_interval_secs),
    ));

    // --- API server ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        vault: Arc::clone(&vault),
        metrics: Arc::clone(&node_metrics),
    };
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", config.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "API server error");
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!(error = %e, "metrics server error");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    health_loop.abort();
    event_loop.abort();
    tracing::info!("aion-node stopped");
    Ok(())
}

/// Counts every vault event and refreshes the gauges after it.
async fn forward_events(vault: Arc<Vault>, metrics: SharedMetrics) {
    let mut rx = vault.subscribe();
    loop {
        match rx.recv().await {
            Ok(record) => {
                metrics.observe(&record);
                metrics.refresh(&vault.stats());
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "metrics event forwarder lagged");
                metrics.refresh(&vault.stats());
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Polls the active adapter on a fixed interval. Adapter calls may block, so
/// each check runs on the blocking pool.
async fn run_health_checks(vault: Arc<Vault>, metrics: SharedMetrics, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let vault_ref = Arc::clone(&vault);
        match tokio::task::spawn_blocking(move || vault_ref.check_health()).await {
            Ok(Ok(report)) => {
                if report.healthy {
                    tracing::debug!(adapter = ?report.adapter, "health check passed");
                } else {
                    tracing::warn!(adapter = ?report.adapter, breaker = ?report.breaker, "health check failed");
                }
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "health check skipped"),
            Err(e) => tracing::error!(error = %e, "health check task panicked"),
        }
        metrics.refresh(&vault.stats());
    }
}

fn refuse_overwrite(path: &std::path::Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    Ok(())
}

/// Writes a starter configuration file owned by a freshly generated key.
fn init_node(args: cli::InitArgs, log_format: LogFormat) -> Result<()> {
    logging::init_logging("aion_node=info", log_format);

    let key_path = args
        .key_file
        .clone()
        .unwrap_or_else(|| args.config.with_extension("key"));
    refuse_overwrite(&args.config, args.force)?;
    refuse_overwrite(&key_path, args.force)?;
    if let Some(parent) = args.config.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let key = auth::generate_key();
    auth::write_key_file(&key_path, &key)?;
    let owner = auth::address_of(&key.verifying_key());

    let config = NodeConfig::starter(owner);
    config.save(&args.config)?;
    tracing::info!(
        path = %args.config.display(),
        key_path = %key_path.display(),
        %owner,
        "starter configuration written"
    );

    println!("Configuration written.");
    println!("  File      : {}", args.config.display());
    println!("  Owner     : {}", owner);
    println!("  Owner key : {}", key_path.display());
    println!("  Adapters  : {}", config.adapters.len());
    println!("  API port  : {}", config.api_port);
    Ok(())
}

/// Writes a new signing key and prints the address it controls.
fn generate_key(args: cli::KeygenArgs) -> Result<()> {
    refuse_overwrite(&args.out, args.force)?;
    let key = auth::generate_key();
    auth::write_key_file(&args.out, &key)?;
    println!("Key written.");
    println!("  File    : {}", args.out.display());
    println!("  Address : {}", auth::address_of(&key.verifying_key()));
    Ok(())
}

/// Prints the three authentication headers for one request, valid for
/// [`auth::MAX_CLOCK_SKEW_SECS`] around now.
fn sign_request(args: cli::SignArgs) -> Result<()> {
    let key = auth::read_key_file(&args.key_file)?;
    let method = args.method.to_ascii_uppercase();
    let now = chrono::Utc::now().timestamp();
    for (name, value) in auth::sign_request(&key, &method, &args.path, now, args.body.as_bytes()) {
        println!("{name}: {value}");
    }
    Ok(())
}

/// Fetches `/status` from a running node and prints the body.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(&args.api_addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.api_addr))?;
    let request = format!(
        "GET /status HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        args.api_addr
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or(response.as_ref());
    println!("{}", body);
    Ok(())
}

fn print_version() {
    println!("aion-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc     {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT or SIGTERM. Only Ctrl+C on non-Unix platforms.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
