//! Device module: the battery monitor's HTTP API.
//!
//! Telemetry lives at `GET /`, actuator outputs at `GET /led?pin=&state=`.

mod http;
mod outputs;

pub use http::*;
pub use outputs::*;

use std::time::Duration;
use thiserror::Error;

/// Device request error types.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("device answered with HTTP {0}")]
    Status(u16),
    #[error("invalid telemetry payload: {0}")]
    Parse(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unknown output: {0}")]
    UnknownOutput(String),
}

/// Build a URL on the device from a bare address or a full base URL.
pub fn device_url(address: &str, path: &str) -> String {
    let base = if address.starts_with("http://") || address.starts_with("https://") {
        address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", address.trim_end_matches('/'))
    };
    format!("{}{}", base, path)
}
