//! The reading shown on dashboards.

use rand::Rng;
use serde::Serialize;

use super::battery::{status_from_voltage, BatteryStatus};
use crate::device::DeviceTelemetry;

const VOLTAGE_JITTER: f64 = 0.2;
const CURRENT1_JITTER: f64 = 0.5;
const CURRENT2_JITTER: f64 = 0.3;

/// Latest sensor values plus the derived percentage and status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub voltage: f64,
    pub current1: f64,
    pub current2: f64,
    pub temperature: f64,
    pub percentage: u8,
    pub status: BatteryStatus,
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            voltage: 12.6,
            current1: 2.3,
            current2: 1.8,
            temperature: 24.0,
            percentage: 85,
            status: status_from_voltage(12.6),
        }
    }
}

impl Reading {
    /// Build a reading from a device sample and the percentage to display.
    pub fn from_telemetry(t: &DeviceTelemetry, percentage: u8) -> Self {
        Self {
            voltage: t.voltage.max(0.0),
            current1: t.current1,
            current2: t.current2,
            temperature: t.temperature,
            percentage,
            status: status_from_voltage(t.voltage),
        }
    }

    /// Synthetic values scattered around this reading, used while the device
    /// is unreachable. Percentage, status and temperature are carried over.
    pub fn jittered<R: Rng + ?Sized>(&self, rng: &mut R) -> Self {
        let mut spread = |width: f64| (rng.gen::<f64>() - 0.5) * width;
        Self {
            voltage: (self.voltage + spread(VOLTAGE_JITTER)).max(0.0),
            current1: self.current1 + spread(CURRENT1_JITTER),
            current2: self.current2 + spread(CURRENT2_JITTER),
            temperature: self.temperature,
            percentage: self.percentage,
            status: self.status,
        }
    }
}
