//! Battery percentage and status derivation.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Voltage shown as the minimum percentage.
pub const MIN_REFERENCE_VOLTAGE: f64 = 10.8;
/// Voltage shown as a full battery.
pub const MAX_REFERENCE_VOLTAGE: f64 = 12.8;
pub const MIN_PERCENTAGE: u8 = 5;
pub const MAX_PERCENTAGE: u8 = 100;

// Lower bounds of each status band, highest first.
const EXCELLENT_VOLTAGE: f64 = 12.6;
const GOOD_VOLTAGE: f64 = 12.4;
const FAIR_VOLTAGE: f64 = 12.0;
const LOW_VOLTAGE: f64 = 11.8;

/// Discrete battery condition derived from the raw voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatteryStatus {
    Excellent,
    Good,
    Fair,
    Low,
    Critical,
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatteryStatus::Excellent => "Excellent",
            BatteryStatus::Good => "Good",
            BatteryStatus::Fair => "Fair",
            BatteryStatus::Low => "Low",
            BatteryStatus::Critical => "Critical",
        };
        f.write_str(label)
    }
}

/// Map a voltage onto the status bands. A value exactly on a threshold
/// belongs to the higher band.
pub fn status_from_voltage(voltage: f64) -> BatteryStatus {
    if voltage >= EXCELLENT_VOLTAGE {
        BatteryStatus::Excellent
    } else if voltage >= GOOD_VOLTAGE {
        BatteryStatus::Good
    } else if voltage >= FAIR_VOLTAGE {
        BatteryStatus::Fair
    } else if voltage >= LOW_VOLTAGE {
        BatteryStatus::Low
    } else {
        BatteryStatus::Critical
    }
}

/// Linear voltage-to-percentage mapping, clamped to 5..=100.
pub fn percentage_from_voltage(voltage: f64) -> u8 {
    if voltage.is_nan() || voltage <= MIN_REFERENCE_VOLTAGE {
        return MIN_PERCENTAGE;
    }
    if voltage >= MAX_REFERENCE_VOLTAGE {
        return MAX_PERCENTAGE;
    }

    let span = f64::from(MAX_PERCENTAGE - MIN_PERCENTAGE);
    let fraction = (voltage - MIN_REFERENCE_VOLTAGE) / (MAX_REFERENCE_VOLTAGE - MIN_REFERENCE_VOLTAGE);
    let pct = (f64::from(MIN_PERCENTAGE) + fraction * span).round();
    pct.clamp(f64::from(MIN_PERCENTAGE), f64::from(MAX_PERCENTAGE)) as u8
}

/// Holds the displayed percentage and only lets it move once per window.
#[derive(Debug, Clone)]
pub struct PercentageStabilizer {
    window: Duration,
    displayed: u8,
    last_commit: Option<Instant>,
}

impl PercentageStabilizer {
    pub fn new(window: Duration, initial: u8) -> Self {
        Self {
            window,
            displayed: initial.clamp(MIN_PERCENTAGE, MAX_PERCENTAGE),
            last_commit: None,
        }
    }

    #[cfg(test)]
    pub fn last_commit(&self) -> Option<Instant> {
        self.last_commit
    }

    /// Forget the commit history so the next positive voltage commits at once.
    pub fn reset(&mut self, initial: u8) {
        self.displayed = initial.clamp(MIN_PERCENTAGE, MAX_PERCENTAGE);
        self.last_commit = None;
    }

    /// Offer a fresh voltage observed at `now` and return the percentage to display.
    ///
    /// The first positive voltage always commits; later ones commit only once
    /// the window since the previous commit has fully elapsed. Non-positive
    /// voltages never commit.
    pub fn offer(&mut self, voltage: f64, now: Instant) -> u8 {
        if !(voltage > 0.0) {
            return self.displayed;
        }

        let due = match self.last_commit {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.window,
        };

        if due {
            let fresh = percentage_from_voltage(voltage);
            if fresh != self.displayed {
                tracing::debug!("Displayed percentage {} -> {}", self.displayed, fresh);
            }
            self.displayed = fresh;
            self.last_commit = Some(now);
        }

        self.displayed
    }
}
