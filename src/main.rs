//! Execstream - Entry Point
//!
//! CLI that follows an execution stream and keeps the subscription alive.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

use execstream::connection::{ChannelHandler, ConnectionEvent, ConnectionManager};
use execstream::transport::{Connector, Transport, WsConnector};
use execstream::{Config, VERSION};

/// Execstream - resilient execution-stream client
#[derive(Parser)]
#[command(name = "execstream")]
#[command(version = VERSION)]
#[command(about = "Follow an execution stream over WebSocket with automatic reconnection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream application frames to stdout as JSON lines
    Watch {
        /// Path to configuration file
        #[arg(short, long, default_value = "execstream.toml")]
        config: PathBuf,
        /// Override the endpoint URL
        #[arg(long)]
        url: Option<String>,
        /// Override the user id
        #[arg(long)]
        user_id: Option<String>,
        /// Override the conversation id
        #[arg(long)]
        conversation_id: Option<String>,
    },
    /// Make a single connection attempt and report the outcome
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "execstream.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install the ring crypto provider for rustls
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            config,
            url,
            user_id,
            conversation_id,
        } => watch(config, url, user_id, conversation_id).await,
        Commands::Check { config } => check(config).await,
    }
}

async fn watch(
    config_path: PathBuf,
    url: Option<String>,
    user_id: Option<String>,
    conversation_id: Option<String>,
) -> Result<()> {
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    if let Some(url) = url {
        config.endpoint.url = url;
    }
    if user_id.is_some() {
        config.endpoint.user_id = user_id;
    }
    if conversation_id.is_some() {
        config.endpoint.conversation_id = conversation_id;
    }
    config.validate()?;

    execstream::util::init_tracing(&config.logging)?;

    info!(
        version = VERSION,
        config_path = ?config_path,
        url = %config.endpoint.url,
        "Starting execstream"
    );

    if config.metrics.enabled {
        execstream::metrics::init_metrics(&config.metrics)?;
        info!(bind_addr = %config.metrics.bind_addr, "Metrics endpoint started");
    }

    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config.manager_config()?, WsConnector::new(), handler);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut stdout = tokio::io::stdout();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(event) => report(event, &mut stdout).await?,
                None => break,
            },
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => handle_input(&manager, line.trim()),
                None => stdin_open = false,
            },
        }
    }

    manager.shutdown().await;
    info!("Stopped");
    Ok(())
}

async fn report(event: ConnectionEvent, stdout: &mut tokio::io::Stdout) -> Result<()> {
    match event {
        ConnectionEvent::Message(frame) => {
            let mut line = serde_json::to_vec(&frame)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
        }
        ConnectionEvent::Connected => info!("Stream connected"),
        ConnectionEvent::Disconnected(reason) => {
            info!(code = reason.code, clean = reason.clean, %reason, "Stream disconnected")
        }
        ConnectionEvent::Error(e) if e.is_fatal() => {
            error!(error = %e, "Stream gave up, enter :reconnect to try again")
        }
        ConnectionEvent::Error(e) => warn!(error = %e, "Stream error"),
    }
    Ok(())
}

fn handle_input(manager: &ConnectionManager, line: &str) {
    match line {
        "" => {}
        ":reconnect" => manager.reconnect(),
        ":disconnect" => manager.disconnect(),
        ":resume" => manager.resume(),
        ":status" => match serde_json::to_string(&manager.status().to_info()) {
            Ok(status) => info!(%status, "Status"),
            Err(e) => warn!(error = %e, "Failed to encode status"),
        },
        frame => match serde_json::from_str::<serde_json::Value>(frame) {
            Ok(frame) => manager.send_message(&frame),
            Err(e) => warn!(error = %e, "Ignoring input that is not JSON"),
        },
    }
}

async fn check(config_path: PathBuf) -> Result<()> {
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Initialize simple tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::INFO)
        .init();

    let manager_config = config.manager_config()?;
    let url = manager_config.endpoint.to_url();
    info!(%url, "Testing connection");

    let attempt = tokio::time::timeout(
        manager_config.connect_timeout,
        WsConnector::new().connect(&url),
    )
    .await;

    match attempt {
        Ok(Ok(mut transport)) => {
            transport.close().await;
            info!("Connection test successful!");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Connection test failed");
            Err(e.into())
        }
        Err(_) => {
            let timeout = manager_config.connect_timeout;
            error!(timeout_ms = timeout.as_millis() as u64, "Connection test timed out");
            anyhow::bail!("no connection within {:?}", timeout)
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
