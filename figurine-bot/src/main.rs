//! Figurine Bot - Main entry point.
//!
//! Runs the bot against the terminal: each stdin line is one inbound
//! message, `file://` tokens become image attachments.

use std::sync::Arc;

use anyhow::Result;
use figurine_bot::{Channel, CliChannel, FigurineService};
use figurine_common::config::{Config, ConfigSource};
use figurine_common::logging::init_logging;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let (config, source) = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
        config.figurine.enable_logging,
    );

    tracing::info!("Figurine Bot v{}", env!("CARGO_PKG_VERSION"));
    match source {
        ConfigSource::File(_) => tracing::info!(source = %source, "Loaded configuration"),
        ConfigSource::Defaults(_) => {
            tracing::info!(source = %source, "Config file not found, using defaults")
        }
    }

    let channel = Arc::new(CliChannel::new());
    let service = Arc::new(FigurineService::activate(&config, channel.clone())?);

    let (tx, rx) = mpsc::unbounded_channel();
    let mut processor = FigurineService::spawn_processor(service.clone(), rx);

    let listener = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .listen(move |message| {
                    if tx.send(message).is_err() {
                        tracing::warn!("Processor stopped, dropping inbound message");
                    }
                })
                .await
        })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            processor.abort();
        }
        result = listener => {
            if let Ok(Err(e)) = result {
                tracing::error!(error = %e, "Channel listener failed");
            }
            // The sender went away with the listener; let running requests finish.
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, abandoning outstanding requests");
                    processor.abort();
                }
                _ = &mut processor => {}
            }
        }
    }

    service.shutdown();
    channel.shutdown().await?;
    Ok(())
}
