//! Session store: registered devices plus the current session.
//!
//! The whole state is held in memory and every mutation persists the affected
//! collection in full before the in-memory copy is replaced.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex, MutexGuard};

use super::models::{CurrentSession, RegisteredDevice};
use super::store::{KvStore, StoreError};

pub const DEVICES_KEY: &str = "registeredDevices";
pub const SESSION_KEY: &str = "currentSession";

#[derive(Debug, Default)]
struct SessionState {
    devices: Vec<RegisteredDevice>,
    current: Option<CurrentSession>,
}

/// Durable registry of devices and the session the app is bound to.
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    state: Mutex<SessionState>,
}

impl SessionStore {
    /// Load devices and the current session from the key-value store.
    ///
    /// Missing or unreadable keys fall back to an empty list / no session.
    pub fn load(kv: Arc<dyn KvStore>) -> Self {
        let devices: Vec<RegisteredDevice> = read_key(kv.as_ref(), DEVICES_KEY).unwrap_or_default();
        let current: Option<CurrentSession> = read_key(kv.as_ref(), SESSION_KEY);

        tracing::info!(
            "Session store loaded {} devices, session: {}",
            devices.len(),
            current
                .as_ref()
                .map(|s| s.network_name.as_str())
                .unwrap_or("none")
        );

        Self {
            kv,
            state: Mutex::new(SessionState { devices, current }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// All registered devices in registration order.
    pub fn devices(&self) -> Vec<RegisteredDevice> {
        self.lock().map(|s| s.devices.clone()).unwrap_or_default()
    }

    /// Look up a registered device by id.
    pub fn device(&self, id: i64) -> Option<RegisteredDevice> {
        self.lock()
            .ok()
            .and_then(|s| s.devices.iter().find(|d| d.id == id).cloned())
    }

    pub fn current_session(&self) -> Option<CurrentSession> {
        self.lock().ok().and_then(|s| s.current.clone())
    }

    /// Append a device and persist the full list.
    ///
    /// A device whose id is already registered replaces that entry in place.
    pub fn register_device(&self, device: RegisteredDevice) -> Result<Vec<RegisteredDevice>, StoreError> {
        let mut state = self.lock()?;
        let mut devices = state.devices.clone();
        match devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => *existing = device,
            None => devices.push(device),
        }
        self.write_devices(&devices)?;
        state.devices = devices.clone();
        Ok(devices)
    }

    /// Remove a device, clearing the current session if it points at it.
    pub fn delete_device(&self, id: i64) -> Result<Vec<RegisteredDevice>, StoreError> {
        let mut state = self.lock()?;
        let devices: Vec<RegisteredDevice> = state.devices.iter().filter(|d| d.id != id).cloned().collect();
        self.write_devices(&devices)?;
        state.devices = devices.clone();

        if state.current.as_ref().is_some_and(|s| s.device_id == id) {
            self.kv.remove(SESSION_KEY)?;
            state.current = None;
            tracing::info!("Cleared current session for deleted device {}", id);
        }

        Ok(devices)
    }

    pub fn set_current_session(&self, session: CurrentSession) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        self.kv.set(SESSION_KEY, &serde_json::to_string(&session)?)?;
        state.current = Some(session);
        Ok(())
    }

    pub fn clear_current_session(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        self.kv.remove(SESSION_KEY)?;
        state.current = None;
        Ok(())
    }

    /// Record a verified connection to `network_name`.
    ///
    /// Updates the device already registered for that network (or the one
    /// named by `device_id`) or registers a new one, then writes the session.
    pub fn record_connection(
        &self,
        device_id: Option<i64>,
        network_name: &str,
        secret: &str,
        is_secured: bool,
        device_address: &str,
        now: DateTime<Utc>,
    ) -> Result<CurrentSession, StoreError> {
        let mut state = self.lock()?;
        let mut devices = state.devices.clone();

        let existing = devices.iter().position(|d| match device_id {
            Some(id) => d.id == id,
            None => d.network_name == network_name,
        });

        let device = match existing {
            Some(idx) => {
                let device = &mut devices[idx];
                device.last_connected_at = now;
                device.secret = secret.to_string();
                device.is_secured = is_secured;
                device.clone()
            }
            None => {
                let mut device = RegisteredDevice::new(network_name, secret, is_secured, now);
                if devices.iter().any(|d| d.id == device.id) {
                    // Same millisecond as an earlier registration
                    device.id = devices.iter().map(|d| d.id).max().unwrap_or(device.id) + 1;
                }
                devices.push(device.clone());
                device
            }
        };

        let session = CurrentSession::for_device(&device, device_address, now);

        self.write_devices(&devices)?;
        state.devices = devices;
        self.kv.set(SESSION_KEY, &serde_json::to_string(&session)?)?;
        state.current = Some(session.clone());

        tracing::info!("Recorded connection to {} (device {})", network_name, device.id);
        Ok(session)
    }

    fn write_devices(&self, devices: &[RegisteredDevice]) -> Result<(), StoreError> {
        self.kv.set(DEVICES_KEY, &serde_json::to_string(devices)?)
    }
}

/// Read and parse a JSON value, logging and discarding any failure.
fn read_key<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Option<T> {
    let raw = match kv.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", key, e);
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Discarding unparseable {}: {}", key, e);
            None
        }
    }
}
