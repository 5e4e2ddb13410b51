//! batlink - Battery monitor client
//!
//! Connects to an ESP32 battery monitor over its WiFi access point, keeps the
//! registered devices and current session, and polls live telemetry.

mod config;
mod db;
mod device;
mod telemetry;
mod web;
mod wifi;

use config::AppConfig;
use db::{SessionStore, SqliteKv};
use device::DeviceClient;
use telemetry::Poller;
use web::Server;
use wifi::{ConnectionFlow, FlowSettings, NmcliWifi};

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("batlink=info".parse()?))
        .init();

    // Load configuration
    let cfg = AppConfig::load();
    tracing::info!("Starting batlink on port {}...", cfg.http_port);
    tracing::info!("Using session store at {}", cfg.db_path);

    // Restore registered devices and session
    let kv = Arc::new(SqliteKv::new(&cfg.db_path)?);
    let sessions = Arc::new(SessionStore::load(kv));
    match sessions.current_session() {
        Some(session) => tracing::info!(
            "Resuming session with {} on {}",
            session.device_name,
            session.network_name
        ),
        None => tracing::info!("No current session, {} registered devices", sessions.devices().len()),
    }

    let wifi = Arc::new(NmcliWifi::new(cfg.wifi_interface.clone()));
    let device = DeviceClient::new(cfg.telemetry_timeout, cfg.control_timeout);

    // Start polling
    let poller = Arc::new(Poller::new(
        sessions.clone(),
        wifi.clone(),
        device.clone(),
        cfg.poll_interval,
        cfg.stabilization_window,
    ));
    poller.start();

    let flow = ConnectionFlow::new(
        wifi,
        sessions.clone(),
        FlowSettings {
            default_network: cfg.default_network.clone(),
            fallback_secret: cfg.fallback_secret.clone(),
        },
        cfg.settle_delay,
        &cfg.device_address,
    );

    // Start web server
    let server = Server::new(cfg, sessions, poller, flow, device);
    server.start().await?;

    Ok(())
}
