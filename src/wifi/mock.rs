//! Scriptable WiFi capability for tests.

use std::sync::Mutex;

use super::{ScannedNetwork, WifiCapability, WifiError};

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectCall {
    pub ssid: String,
    pub secret: String,
    pub is_wep: bool,
}

pub struct MockWifi {
    pub permission: Mutex<bool>,
    pub networks: Mutex<Result<Vec<ScannedNetwork>, String>>,
    pub active: Mutex<Result<Option<String>, String>>,
    pub connect_fails: Mutex<bool>,
    /// Whether a successful connect call changes the active network
    pub connect_joins: Mutex<bool>,
    pub connects: Mutex<Vec<ConnectCall>>,
}

impl Default for MockWifi {
    fn default() -> Self {
        Self {
            permission: Mutex::new(true),
            networks: Mutex::new(Ok(Vec::new())),
            active: Mutex::new(Ok(None)),
            connect_fails: Mutex::new(false),
            connect_joins: Mutex::new(true),
            connects: Mutex::new(Vec::new()),
        }
    }
}

impl MockWifi {
    pub fn with_networks(networks: Vec<ScannedNetwork>) -> Self {
        let wifi = Self::default();
        *wifi.networks.lock().unwrap() = Ok(networks);
        wifi
    }

    pub fn set_active(&self, name: Option<&str>) {
        *self.active.lock().unwrap() = Ok(name.map(str::to_string));
    }

    pub fn connect_calls(&self) -> Vec<ConnectCall> {
        self.connects.lock().unwrap().clone()
    }
}

impl WifiCapability for MockWifi {
    async fn request_scan_permission(&self) -> bool {
        *self.permission.lock().unwrap()
    }

    async fn scan(&self) -> Result<Vec<ScannedNetwork>, WifiError> {
        self.networks.lock().unwrap().clone().map_err(WifiError::Command)
    }

    async fn connect(&self, ssid: &str, secret: &str, is_wep: bool, _is_hidden: bool) -> Result<(), WifiError> {
        self.connects.lock().unwrap().push(ConnectCall {
            ssid: ssid.to_string(),
            secret: secret.to_string(),
            is_wep,
        });
        if *self.connect_fails.lock().unwrap() {
            return Err(WifiError::Command("association rejected".to_string()));
        }
        if *self.connect_joins.lock().unwrap() {
            self.set_active(Some(&format!("\"{}\"", ssid)));
        }
        Ok(())
    }

    async fn active_network_name(&self) -> Result<Option<String>, WifiError> {
        self.active.lock().unwrap().clone().map_err(WifiError::Command)
    }
}
