//! Bridge connection probe
//!
//! Connects to a bridge using the YAML configuration, logs state changes and
//! inbound frames, and keeps the connection alive with periodic pings.
//!
//! Usage:
//!   cargo run --bin bridge_probe [ping_interval_secs]
//!
//! Environment variables:
//!   BRIDGE_CONFIG_PATH - Config file (default: config/bridge.yaml)
//!   BRIDGE_ID_TOKEN    - Relay identity token (relay mode)
//!   BRIDGE_PUSH_TOKEN  - Relay push token (optional)

use anyhow::{Context, Result};
use bridgelink_tools::bin_common::{
    init_tracing, load_bridge_config, parse_args, ConfigType, EnvCredentials, LoggingSession,
    ShutdownManager,
};
use std::time::Duration;
use tracing::info;

const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let ping_interval = match parse_args().first() {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("invalid ping interval '{}'", arg))?,
        None => DEFAULT_PING_INTERVAL_SECS,
    };

    let config = load_bridge_config(ConfigType::Bridge)?;
    info!("Mode: {:?}", config.mode);

    let shutdown = ShutdownManager::new();
    shutdown.spawn_signal_handler();

    let manager = bridgelink::builder()
        .config(config)
        .credentials(EnvCredentials::from_env())
        .session(LoggingSession::new())
        .build()
        .await?;

    info!("Press Ctrl+C to stop");
    manager.connect();

    let status = manager.status();
    while shutdown.is_running() {
        shutdown
            .interruptible_sleep(Duration::from_secs(ping_interval))
            .await;
        if shutdown.is_running() && status.is_connected() && !manager.ping() {
            info!("Keepalive not queued");
        }
    }

    manager.shutdown();

    let metrics = status.metrics();
    info!(
        "Probe stopped: {} packets sent, {} frames received, {} reconnect attempts",
        metrics.packets_sent, metrics.frames_received, metrics.reconnect_attempts
    );
    Ok(())
}
