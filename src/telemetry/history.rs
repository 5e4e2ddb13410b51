//! Rolling min/avg/max statistics over recent device samples.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::device::DeviceTelemetry;

/// Twenty-four hours of samples at the default poll cadence.
pub const DEFAULT_HISTORY_CAPACITY: usize = 24 * 60 * 60 / 2;

/// Window of samples a statistics request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatsRange {
    #[default]
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "24h")]
    Day,
}

impl StatsRange {
    pub fn duration(self) -> Duration {
        match self {
            StatsRange::Hour => Duration::hours(1),
            StatsRange::SixHours => Duration::hours(6),
            StatsRange::Day => Duration::hours(24),
        }
    }
}

/// Summary of one metric over the retained samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricStats {
    pub current: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
}

/// Statistics for every metric the device reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryStats {
    pub range: StatsRange,
    pub voltage: Option<MetricStats>,
    pub current1: Option<MetricStats>,
    pub current2: Option<MetricStats>,
    pub temperature: Option<MetricStats>,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: DateTime<Utc>,
    telemetry: DeviceTelemetry,
}

/// Bounded buffer of real device samples; synthetic values never enter it.
///
/// Samples older than the longest range are dropped as new ones arrive.
#[derive(Debug, Clone)]
pub struct TelemetryHistory {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl TelemetryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
        }
    }

    pub fn record(&mut self, telemetry: DeviceTelemetry, at: DateTime<Utc>) {
        let horizon = at - StatsRange::Day.duration();
        while self
            .samples
            .front()
            .is_some_and(|s| s.at < horizon || self.samples.len() >= self.capacity)
        {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { at, telemetry });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Statistics over the samples within `range` of `now`.
    pub fn stats(&self, range: StatsRange, now: DateTime<Utc>) -> TelemetryStats {
        let cutoff = now - range.duration();
        let window: Vec<&DeviceTelemetry> = self
            .samples
            .iter()
            .filter(|s| s.at >= cutoff)
            .map(|s| &s.telemetry)
            .collect();

        TelemetryStats {
            range,
            voltage: metric(&window, |s| s.voltage),
            current1: metric(&window, |s| s.current1),
            current2: metric(&window, |s| s.current2),
            temperature: metric(&window, |s| s.temperature),
        }
    }
}

impl Default for TelemetryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

fn metric(window: &[&DeviceTelemetry], field: impl Fn(&DeviceTelemetry) -> f64) -> Option<MetricStats> {
    let current = field(window.last()?);

    let (mut min, mut max, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
    for value in window.iter().map(|s| field(s)) {
        min = min.min(value);
        max = max.max(value);
        sum += value;
    }

    Some(MetricStats {
        current,
        avg: sum / window.len() as f64,
        min,
        max,
        samples: window.len(),
    })
}
