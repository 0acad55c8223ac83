// SPDX-License-Identifier: MIT
//
// Entropy Server: Hardware Random Numbers over HTTP
// Copyright (c) 2025 Entropy Server Contributors

//! Entropy Server - serves hardware random bytes as JSON
//!
//! A producer thread drains the hardware RNG into a fixed-size ring buffer;
//! HTTP handlers withdraw exactly the number of bytes each caller asks for,
//! waiting a bounded time when the buffer runs short.
//!
//! # Features
//!
//! - JSON API compatible with existing entropy clients (`/api/entropy/?bytes=N`)
//! - Request-size clamping and global rate limits
//! - Lossy, never-blocking ingestion with dropped-byte accounting
//! - Prometheus metrics and health monitoring
//! - Graceful shutdown that releases waiting requests

mod rate_limit;
mod routes;

use anyhow::{Context, Result};
use clap::Parser;
use entropy_core::{buffer::EntropyBuffer, config::ServerConfig, metrics::Metrics, source};
use routes::AppState;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "entropy-server")]
#[command(about = "Entropy Server - Serves hardware random data via a JSON API", long_about = None)]
struct Args {
    /// Path to configuration file, JSON or YAML (ignored if --env-mode is set)
    #[arg(short, long, default_value = "entropyserver.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Load configuration from environment variables instead of file
    #[arg(long, default_value = "false")]
    env_mode: bool,
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use futures::stream::StreamExt;
        use signal_hook::consts::signal::*;
        use signal_hook_tokio::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;

        if let Some(signal) = signals.next().await {
            info!("Received signal: {:?}", signal);
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = args
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .json()
        .init();

    info!("Entropy Server v{}", entropy_core::VERSION);

    // Load configuration
    let config = if args.env_mode {
        info!("Loading configuration from environment variables");
        ServerConfig::from_env().context("Failed to load configuration from environment")?
    } else {
        info!("Loading configuration from file: {:?}", args.config);
        ServerConfig::from_file(&args.config).context("Failed to load configuration from file")?
    };

    info!("Server: {} ({})", config.server, config.source);
    info!("Buffer size: {} bytes", config.buffer_size);
    info!(
        "Request size: {}-{} bytes, timeout {:?}",
        config.min_request_bytes,
        config.max_request_bytes,
        config.request_timeout()
    );

    // The one buffer of the process, handed to the producer and the handlers
    let buffer = EntropyBuffer::new(config.buffer_size);
    let metrics = Metrics::new();
    let shutdown = CancellationToken::new();

    let entropy_source = source::from_config(&config).context("Failed to open entropy source")?;
    info!("Entropy source: {}", entropy_source.describe());

    let producer = source::spawn_producer(
        entropy_source,
        buffer.clone(),
        metrics.clone(),
        config.read_chunk_size,
        shutdown.clone(),
    )
    .context("Failed to start producer thread")?;

    let addr: std::net::SocketAddr = config
        .listen_address()
        .parse()
        .context("Invalid listen address")?;

    let state = AppState::new(config, buffer, metrics, shutdown.clone());
    let app = routes::router(state);

    // Cancel everything on the first signal
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown().await {
                error!("Signal handling failed: {}", e);
            }
            shutdown.cancel();
        });
    }

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("Server error")?;

    info!("Shutdown signal received, stopping producer...");
    shutdown.cancel();

    // A producer blocked in a device read exits with the process
    if producer.is_finished() {
        match producer.join() {
            Ok(Err(e)) => error!("Producer exited with error: {}", e),
            Err(_) => error!("Producer thread panicked"),
            Ok(Ok(())) => {}
        }
    }

    info!("Entropy server shut down gracefully");
    Ok(())
}
