//! Named actuator outputs and their last commanded state.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{DeviceClient, DeviceError};

/// One switchable output wired to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputChannel {
    pub id: &'static str,
    pub name: &'static str,
    /// Pin index the firmware's `/led` endpoint expects
    pub pin: u8,
}

pub const OUTPUT_CHANNELS: [OutputChannel; 6] = [
    OutputChannel { id: "headlamp", name: "Headlamp", pin: 0 },
    OutputChannel { id: "carLight", name: "Car Light", pin: 1 },
    OutputChannel { id: "trafficator", name: "Trafficator", pin: 2 },
    OutputChannel { id: "rearLight", name: "Rear Light", pin: 3 },
    OutputChannel { id: "extraLight1", name: "Extra Light 1", pin: 4 },
    OutputChannel { id: "extraLight2", name: "Extra Light 2", pin: 5 },
];

/// An output together with its last commanded state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputState {
    pub id: &'static str,
    pub name: &'static str,
    pub pin: u8,
    pub on: bool,
}

/// Find an output by id or by pin number.
pub fn find_channel(key: &str) -> Option<usize> {
    OUTPUT_CHANNELS
        .iter()
        .position(|c| c.id == key || key.parse::<u8>().is_ok_and(|pin| pin == c.pin))
}

/// Switches outputs and remembers what was last commanded, per device address.
///
/// Only switches the device acknowledged are recorded.
pub struct OutputBoard {
    client: DeviceClient,
    states: Mutex<HashMap<String, [bool; OUTPUT_CHANNELS.len()]>>,
}

impl OutputBoard {
    pub fn new(client: DeviceClient) -> Self {
        Self {
            client,
            states: Mutex::new(HashMap::new()),
        }
    }

    // Recorded states are plain booleans, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, HashMap<String, [bool; OUTPUT_CHANNELS.len()]>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every output with its last commanded state on the device at `address`.
    pub fn states(&self, address: &str) -> Vec<OutputState> {
        let flags = self.lock().get(address).copied().unwrap_or_default();
        OUTPUT_CHANNELS
            .iter()
            .zip(flags)
            .map(|(c, on)| OutputState {
                id: c.id,
                name: c.name,
                pin: c.pin,
                on,
            })
            .collect()
    }

    /// Switch the output named by `key` (id or pin).
    pub async fn set(&self, address: &str, key: &str, on: bool) -> Result<OutputState, DeviceError> {
        let idx = find_channel(key).ok_or_else(|| DeviceError::UnknownOutput(key.to_string()))?;
        self.switch(address, idx, on).await?;
        Ok(self.states(address).swap_remove(idx))
    }

    /// Switch every output. All outputs are attempted; the first failure is returned.
    pub async fn set_all(&self, address: &str, on: bool) -> Result<Vec<OutputState>, DeviceError> {
        let mut first_error = None;
        for idx in 0..OUTPUT_CHANNELS.len() {
            if let Err(e) = self.switch(address, idx, on).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("All outputs turned {}", if on { "on" } else { "off" });
                Ok(self.states(address))
            }
        }
    }

    async fn switch(&self, address: &str, idx: usize, on: bool) -> Result<(), DeviceError> {
        let channel = &OUTPUT_CHANNELS[idx];
        if let Err(e) = self.client.set_output(address, channel.pin, on).await {
            tracing::warn!("Switching {} failed: {}", channel.id, e);
            return Err(e);
        }
        self.lock().entry(address.to_string()).or_default()[idx] = on;
        Ok(())
    }
}
