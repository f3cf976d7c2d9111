pub mod config;
pub mod hardware;
pub mod mqtt;
pub mod node;

use crate::config::{config_path, NodeConfig};
use crate::hardware::board::Board;
use crate::mqtt::mqtt_handler::MqttTransport;
use crate::node::scheduler::MonotonicClock;
use crate::node::Node;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let (config, config_file, created) = setup_config().await?;
    let level = config
        .logging
        .level()
        .map_err(|e| eyre!("Invalid logging configuration: {}", e))?;
    setup_logging_env(level);
    if created {
        info!("Wrote default configuration to {}", config_file.display());
    } else {
        info!("Loaded configuration from {}", config_file.display());
    }
    info!(
        "sensornode starting, broker {}:{}",
        config.broker.host, config.broker.port
    );

    let board = Board::create(config.hardware.clone())
        .attach()
        .map_err(|e| eyre!("Failed to attach board: {}", e))?;

    let transport = MqttTransport::new(config.broker.clone());
    let mut node = Node::new(&config, transport, board);
    node.boot().await;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal_token.cancel();
            }
            Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    node.run(MonotonicClock::new(), shutdown).await;
    info!("sensornode stopped");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

async fn setup_config() -> Result<(NodeConfig, PathBuf, bool)> {
    let path = config_path()?;

    // Erster Start: Standardkonfiguration anlegen
    let created = NodeConfig::ensure_default_config(&path).await?;
    let config = NodeConfig::load(&path).await?;
    Ok((config, path, created))
}
