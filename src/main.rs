#![forbid(unsafe_code)]

//! Load test binary - drive a population of simulated chat clients against a server
//!
//! Configured through environment variables:
//!   SERVER_URL=ws://localhost:3000 SERVER_PATH=/ws MAX_CLIENTS=100 cargo run --release
//!   MESSAGE_TYPES='["text","image"]' MIN_DELAY_MS=100 MAX_DELAY_MS=1000 cargo run
//!   RNG_SEED=42 LOG_FILE=run.log RUST_LOG=chat_load=debug cargo run

use anyhow::{Context, Result};
use chat_load::signaling::WsTransport;
use chat_load::{HarnessConfig, PopulationController};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = HarnessConfig::from_env();
    init_tracing(config.as_ref().ok().map(|c| c.log_file.as_path()))?;
    let config = config.context("Invalid load test configuration")?;

    info!("chat-load - Starting load test");
    info!(
        "Clients: {}, messages/client: {}, concurrent: {}, delay: {}-{}ms, types: {:?}",
        config.max_clients,
        config.max_messages_per_client,
        config.max_concurrent_messages,
        config.min_delay_ms,
        config.max_delay_ms,
        config.message_types
    );

    let transport = WsTransport::new(config.endpoint()?);
    info!("Server endpoint: {}", transport.endpoint());

    let rng = match config.rng_seed {
        Some(seed) => {
            info!("Using RNG_SEED={}", seed);
            StdRng::seed_from_u64(seed)
        }
        None => StdRng::from_entropy(),
    };

    let mut controller = PopulationController::new(config, transport, rng)?;

    let stop = controller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, finishing current round...");
            stop.request_stop();
        }
    });

    let summary = controller.start().await?;
    info!(
        "Load test complete: {} messages sent by {} clients",
        summary.total_messages_sent, summary.clients_connected
    );
    Ok(())
}

/// Console output plus an append-only log file when one is configured
fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chat_load=info".into());

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(())
}
