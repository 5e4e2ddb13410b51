//! HTTP client for the device.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::{device_url, DeviceError};

/// Temperature reported when the device omits it.
pub const FALLBACK_TEMPERATURE: f64 = 24.0;

/// A telemetry sample as delivered by the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeviceTelemetry {
    pub voltage: f64,
    pub current1: f64,
    pub current2: f64,
    pub temperature: f64,
}

#[derive(Debug, Deserialize)]
struct TelemetryPayload {
    #[serde(default)]
    voltage: Option<f64>,
    #[serde(default)]
    current1: Option<f64>,
    #[serde(default)]
    current2: Option<f64>,
    #[serde(default)]
    temperature: Option<f64>,
}

impl From<TelemetryPayload> for DeviceTelemetry {
    fn from(p: TelemetryPayload) -> Self {
        Self {
            voltage: p.voltage.unwrap_or(0.0),
            current1: p.current1.unwrap_or(0.0),
            current2: p.current2.unwrap_or(0.0),
            temperature: p.temperature.unwrap_or(FALLBACK_TEMPERATURE),
        }
    }
}

/// Parse a telemetry body, defaulting absent or null fields.
pub fn parse_telemetry(body: &str) -> Result<DeviceTelemetry, DeviceError> {
    let payload: TelemetryPayload =
        serde_json::from_str(body).map_err(|e| DeviceError::Parse(e.to_string()))?;
    Ok(payload.into())
}

/// Client for the device HTTP API.
#[derive(Debug, Clone)]
pub struct DeviceClient {
    client: reqwest::Client,
    telemetry_timeout: Duration,
    control_timeout: Duration,
}

impl DeviceClient {
    pub fn new(telemetry_timeout: Duration, control_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            telemetry_timeout,
            control_timeout,
        }
    }

    /// Fetch the current telemetry sample from `GET /`.
    pub async fn fetch_telemetry(&self, address: &str) -> Result<DeviceTelemetry, DeviceError> {
        let url = device_url(address, "/");
        let body = self.get_text(&url, self.telemetry_timeout).await?;
        parse_telemetry(&body)
    }

    /// Switch an actuator output on or off.
    pub async fn set_output(&self, address: &str, pin: u8, on: bool) -> Result<(), DeviceError> {
        let url = device_url(address, &format!("/led?pin={}&state={}", pin, u8::from(on)));
        self.get_text(&url, self.control_timeout).await?;
        tracing::info!("Output {} turned {}", pin, if on { "on" } else { "off" });
        Ok(())
    }

    /// Check the device answers at all and return the round-trip time.
    pub async fn check(&self, address: &str) -> Result<Duration, DeviceError> {
        let url = device_url(address, "/");
        let start = Instant::now();
        self.get_text(&url, self.telemetry_timeout).await?;
        Ok(start.elapsed())
    }

    async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, DeviceError> {
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                DeviceError::Timeout(timeout)
            } else {
                DeviceError::Network(e.to_string())
            }
        };

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_err)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Status(status.as_u16()));
        }

        response.text().await.map_err(map_err)
    }
}
