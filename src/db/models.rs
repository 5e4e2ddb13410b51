//! Persisted model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A device that was connected to successfully at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredDevice {
    /// Millisecond timestamp of the first registration
    pub id: i64,
    pub name: String,
    pub network_name: String,
    pub registered_at: DateTime<Utc>,
    pub last_connected_at: DateTime<Utc>,
    /// Cached network secret, empty for open networks
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub is_secured: bool,
}

impl RegisteredDevice {
    /// Create a device registration for a network connected to at `now`.
    pub fn new(network_name: &str, secret: &str, is_secured: bool, now: DateTime<Utc>) -> Self {
        Self {
            id: now.timestamp_millis(),
            name: format!("Device ({})", network_name),
            network_name: network_name.to_string(),
            registered_at: now,
            last_connected_at: now,
            secret: secret.to_string(),
            is_secured,
        }
    }

    /// Whether a reconnect can proceed with the cached credentials alone.
    pub fn has_usable_secret(&self) -> bool {
        !self.is_secured || !self.secret.is_empty()
    }
}

/// The device the application is currently bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSession {
    pub device_id: i64,
    pub device_name: String,
    pub network_name: String,
    pub device_address: String,
    pub connected_at: DateTime<Utc>,
}

impl CurrentSession {
    pub fn for_device(device: &RegisteredDevice, device_address: &str, now: DateTime<Utc>) -> Self {
        Self {
            device_id: device.id,
            device_name: device.name.clone(),
            network_name: device.network_name.clone(),
            device_address: device_address.to_string(),
            connected_at: now,
        }
    }
}
