//! Configuration module for batlink.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Timing values are fixed constants; they live on the config so tests can
//! shorten them.

use std::env;
use std::time::Duration;

/// Interval between telemetry poll cycles.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum time between accepted updates of the displayed battery percentage.
pub const STABILIZATION_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Wait after a connect request before reading back the active network.
pub const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Timeout for telemetry fetches.
pub const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for actuator control requests.
pub const CONTROL_TIMEOUT: Duration = Duration::from_secs(3);

/// Address of the device on its own access point.
pub const DEFAULT_DEVICE_ADDRESS: &str = "192.168.4.1";

/// Network name broadcast by the device firmware out of the box.
pub const DEFAULT_NETWORK_NAME: &str = "BatteryMonitorAP";

/// Secret used for the default network when none is entered.
pub const DEFAULT_FALLBACK_SECRET: &str = "12345678";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP port for the local API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite key-value file (default: "batlink.db")
    pub db_path: String,
    /// Address written into new sessions (default: "192.168.4.1")
    pub device_address: String,
    /// Network name treated as a target device by exact match
    pub default_network: String,
    /// Secret substituted for a blank entry on the default network
    pub fallback_secret: String,
    /// WiFi interface handed to nmcli; NetworkManager picks one when unset
    pub wifi_interface: Option<String>,
    pub poll_interval: Duration,
    pub stabilization_window: Duration,
    pub settle_delay: Duration,
    pub telemetry_timeout: Duration,
    pub control_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "batlink.db".to_string(),
            device_address: DEFAULT_DEVICE_ADDRESS.to_string(),
            default_network: DEFAULT_NETWORK_NAME.to_string(),
            fallback_secret: DEFAULT_FALLBACK_SECRET.to_string(),
            wifi_interface: None,
            poll_interval: POLL_INTERVAL,
            stabilization_window: STABILIZATION_WINDOW,
            settle_delay: SETTLE_DELAY,
            telemetry_timeout: TELEMETRY_TIMEOUT,
            control_timeout: CONTROL_TIMEOUT,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `BATLINK_HTTP_PORT`: HTTP port (default: 8080)
    /// - `BATLINK_DB_PATH`: key-value file path (default: "batlink.db")
    /// - `BATLINK_DEVICE_ADDRESS`: device address (default: "192.168.4.1")
    /// - `BATLINK_DEFAULT_NETWORK`: default device network name
    /// - `BATLINK_FALLBACK_SECRET`: secret used for a blank entry on the default network
    /// - `BATLINK_WIFI_INTERFACE`: interface for nmcli (default: any)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("BATLINK_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("BATLINK_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(address) = env::var("BATLINK_DEVICE_ADDRESS") {
            if !address.trim().is_empty() {
                cfg.device_address = address.trim().to_string();
            }
        }

        if let Ok(name) = env::var("BATLINK_DEFAULT_NETWORK") {
            if !name.is_empty() {
                cfg.default_network = name;
            }
        }

        if let Ok(secret) = env::var("BATLINK_FALLBACK_SECRET") {
            cfg.fallback_secret = secret;
        }

        if let Ok(iface) = env::var("BATLINK_WIFI_INTERFACE") {
            if !iface.is_empty() {
                cfg.wifi_interface = Some(iface);
            }
        }

        cfg
    }
}
