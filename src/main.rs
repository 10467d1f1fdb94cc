#![forbid(unsafe_code)]

//! `mcp-capability-server` binary.
//!
//! Loads configuration, applies command-line overrides, registers the
//! built-in capabilities and serves the selected transport until stdin
//! closes (stdio) or a shutdown signal arrives.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_capability_server::config::{GlobalConfig, TransportKind};
use mcp_capability_server::{builtin, AppError, Result, Server};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "mcp-capability-server", about = "JSON-RPC 2.0 MCP capability server", version, long_about = None)]
struct Cli {
    /// Transport to serve [default: stdio].
    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    /// WebSocket bind host [default: localhost].
    #[arg(long)]
    host: Option<String>,

    /// WebSocket bind port [default: 8080].
    #[arg(long)]
    port: Option<u16>,

    /// WebSocket upgrade path [default: /mcp].
    #[arg(long)]
    path: Option<String>,

    /// Optional TOML configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("mcp-capability-server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(kind) = args.transport {
        config.transport.kind = kind;
    }
    if let Some(host) = args.host {
        config.transport.host = host;
    }
    if let Some(port) = args.port {
        config.transport.port = port;
    }
    if let Some(path) = args.path {
        config.transport.path = path;
    }
    config.validate()?;
    config.load_credentials()?;
    info!(transport = ?config.transport.kind, "configuration loaded");

    // ── Build server ────────────────────────────────────
    let registry = builtin::registry(&config)?;
    let server = Server::new(config, registry)?;

    // ── Serve until input ends or a signal arrives ──────
    let ct = CancellationToken::new();
    let serve_ct = ct.clone();
    let mut serve_handle = tokio::spawn(async move { server.run(serve_ct).await });

    tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            ct.cancel();
            match serve_handle.await {
                Ok(result) => result?,
                Err(err) => error!(%err, "server task failed"),
            }
        }
        joined = &mut serve_handle => match joined {
            Ok(result) => result?,
            Err(err) => error!(%err, "server task failed"),
        },
    }

    info!("mcp-capability-server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries protocol frames on the stdio transport.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
