//! WiFi module: discovery, the connection state machine and its driver.

mod connection;
mod flow;
#[cfg(test)]
pub mod mock;
mod nmcli;

pub use connection::*;
pub use flow::*;
pub use nmcli::*;

use serde::Serialize;
use std::future::Future;
use thiserror::Error;

use crate::db::StoreError;

/// Signal level assumed when a scan entry carries none.
pub const DEFAULT_SIGNAL_LEVEL: i32 = -70;

/// Name fragments identifying a battery monitor access point.
const TARGET_KEYWORDS: [&str; 3] = ["battery", "esp32", "monitor"];

/// Capability-string fragments marking a secured network.
const SECURITY_MARKERS: [&str; 4] = ["WPA", "WEP", "SAE", "RSN"];

/// Errors raised by the platform WiFi capability.
#[derive(Error, Debug)]
pub enum WifiError {
    #[error("wifi command failed: {0}")]
    Command(String),
    #[error("wifi operation unsupported: {0}")]
    Unsupported(String),
}

/// Errors surfaced by the connection flow.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("location permission is required to scan for WiFi networks")]
    PermissionDenied,
    #[error("{0}")]
    ScanUnavailable(String),
    #[error("{0} is not a battery monitor network")]
    InvalidNetworkSelection(String),
    #[error("could not verify connection to {0}")]
    ConnectionUnverified(String),
    #[error("a secret is required for {0}")]
    SecretRequired(String),
    #[error("device {0} has no cached secret and must be registered again")]
    ReRegistrationRequired(i64),
    #[error("unknown device {0}")]
    UnknownDevice(i64),
    #[error("{event} is not valid while {state}")]
    InvalidTransition { state: &'static str, event: &'static str },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A raw scan entry as reported by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedNetwork {
    pub ssid: String,
    /// Signal level in dBm
    pub level: Option<i32>,
    pub capabilities: String,
}

/// A scan entry classified for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredNetwork {
    pub id: usize,
    pub ssid: String,
    pub signal_level: i32,
    pub is_secured: bool,
    pub is_target_device: bool,
    #[serde(skip)]
    pub is_wep: bool,
}

/// Platform WiFi primitives.
pub trait WifiCapability: Send + Sync + 'static {
    /// Ask for the permission scanning needs. Platforms without such a gate
    /// grant it unconditionally.
    fn request_scan_permission(&self) -> impl Future<Output = bool> + Send {
        async { true }
    }

    fn scan(&self) -> impl Future<Output = Result<Vec<ScannedNetwork>, WifiError>> + Send;

    fn connect(
        &self,
        ssid: &str,
        secret: &str,
        is_wep: bool,
        is_hidden: bool,
    ) -> impl Future<Output = Result<(), WifiError>> + Send;

    /// Name of the network currently joined, if any.
    fn active_network_name(&self) -> impl Future<Output = Result<Option<String>, WifiError>> + Send;
}

/// Strip the quotes some platforms wrap network names in.
pub fn strip_quotes(name: &str) -> String {
    name.replace('"', "")
}

/// Whether an active network name refers to `target`.
pub fn same_network(active: &str, target: &str) -> bool {
    strip_quotes(active) == target
}

/// Whether a network name looks like a battery monitor access point.
pub fn is_target_network(ssid: &str, default_network: &str) -> bool {
    let lower = ssid.to_lowercase();
    ssid == default_network || TARGET_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Filter, classify and sort raw scan results, strongest signal first.
pub fn classify_networks(raw: Vec<ScannedNetwork>, default_network: &str) -> Vec<DiscoveredNetwork> {
    let mut networks: Vec<DiscoveredNetwork> = raw
        .into_iter()
        .filter(|n| !n.ssid.trim().is_empty())
        .enumerate()
        .map(|(id, n)| {
            let caps = n.capabilities.to_uppercase();
            DiscoveredNetwork {
                id,
                is_target_device: is_target_network(&n.ssid, default_network),
                is_secured: SECURITY_MARKERS.iter().any(|m| caps.contains(m)),
                is_wep: caps.contains("WEP"),
                signal_level: n.level.unwrap_or(DEFAULT_SIGNAL_LEVEL),
                ssid: n.ssid,
            }
        })
        .collect();

    networks.sort_by(|a, b| b.signal_level.cmp(&a.signal_level));
    networks
}
