//! HTTP request handlers.

use super::AppState;
use crate::device::DeviceError;
use crate::telemetry::StatsRange;
use crate::wifi::{ConnectError, ConnectionState, FailureReason, SelectOutcome, WifiCapability};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<&'static str>,
}

fn error_response(status: StatusCode, error: impl ToString, remediation: Option<&'static str>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            remediation,
        }),
    )
        .into_response()
}

fn connect_error_response(e: ConnectError) -> Response {
    let (status, remediation) = match &e {
        ConnectError::PermissionDenied => {
            (StatusCode::FORBIDDEN, Some(FailureReason::PermissionDenied.remediation()))
        }
        ConnectError::ScanUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
        ConnectError::InvalidNetworkSelection(_) | ConnectError::SecretRequired(_) => {
            (StatusCode::BAD_REQUEST, None)
        }
        ConnectError::ConnectionUnverified(_) => (
            StatusCode::BAD_GATEWAY,
            Some(FailureReason::ConnectionUnverified.remediation()),
        ),
        ConnectError::ReRegistrationRequired(_) => (StatusCode::UNPROCESSABLE_ENTITY, None),
        ConnectError::UnknownDevice(_) => (StatusCode::NOT_FOUND, None),
        ConnectError::InvalidTransition { .. } => (StatusCode::CONFLICT, None),
        ConnectError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };
    error_response(status, e, remediation)
}

fn device_error_response(e: DeviceError) -> Response {
    let status = match e {
        DeviceError::UnknownOutput(_) => StatusCode::NOT_FOUND,
        DeviceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    error_response(status, e, None)
}

fn flow_busy() -> Response {
    error_response(StatusCode::CONFLICT, "a connection attempt is already in progress", None)
}

// ============================================================================
// API: Telemetry
// ============================================================================

pub async fn handle_get_reading<W: WifiCapability>(State(state): State<AppState<W>>) -> impl IntoResponse {
    Json(state.poller.snapshot().await)
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub range: StatsRange,
}

pub async fn handle_get_stats<W: WifiCapability>(
    State(state): State<AppState<W>>,
    Query(query): Query<StatsQuery>,
) -> impl IntoResponse {
    Json(state.poller.stats(query.range).await)
}

// ============================================================================
// API: Devices and session
// ============================================================================

pub async fn handle_get_devices<W: WifiCapability>(State(state): State<AppState<W>>) -> impl IntoResponse {
    Json(state.sessions.devices())
}

pub async fn handle_delete_device<W: WifiCapability>(
    State(state): State<AppState<W>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if state.sessions.device(id).is_none() {
        return error_response(StatusCode::NOT_FOUND, "Device not found", None);
    }

    match state.sessions.delete_device(id) {
        Ok(devices) => {
            tracing::info!("Deleted device {}", id);
            Json(devices).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e, None),
    }
}

pub async fn handle_reconnect_device<W: WifiCapability>(
    State(state): State<AppState<W>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let Ok(mut flow) = state.flow.try_lock() else {
        return flow_busy();
    };

    match flow.reconnect(id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => connect_error_response(e),
    }
}

pub async fn handle_get_session<W: WifiCapability>(State(state): State<AppState<W>>) -> impl IntoResponse {
    match state.sessions.current_session() {
        Some(session) => Json(session).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "No current session", None),
    }
}

pub async fn handle_clear_session<W: WifiCapability>(State(state): State<AppState<W>>) -> impl IntoResponse {
    match state.sessions.clear_current_session() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e, None),
    }
}

// ============================================================================
// API: Connection flow
// ============================================================================

pub async fn handle_get_connection<W: WifiCapability>(State(state): State<AppState<W>>) -> impl IntoResponse {
    let Ok(flow) = state.flow.try_lock() else {
        return flow_busy();
    };
    Json(flow.state().clone()).into_response()
}

pub async fn handle_scan<W: WifiCapability>(State(state): State<AppState<W>>) -> impl IntoResponse {
    let Ok(mut flow) = state.flow.try_lock() else {
        return flow_busy();
    };

    match flow.scan().await {
        Ok(networks) => Json(networks).into_response(),
        Err(e) => connect_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub ssid: String,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RetryRequest {
    #[serde(default)]
    pub secret: Option<String>,
}

pub async fn handle_connect<W: WifiCapability>(
    State(state): State<AppState<W>>,
    Json(req): Json<ConnectRequest>,
) -> impl IntoResponse {
    let Ok(mut flow) = state.flow.try_lock() else {
        return flow_busy();
    };

    let result = match flow.select(&req.ssid).await {
        Ok(SelectOutcome::SecretRequired { target }) => match req.secret {
            Some(secret) => flow
                .submit_secret(&secret)
                .await
                .map(|session| SelectOutcome::Connected { session }),
            None => Ok(SelectOutcome::SecretRequired { target }),
        },
        other => other,
    };

    match result {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => connect_error_response(e),
    }
}

pub async fn handle_retry<W: WifiCapability>(
    State(state): State<AppState<W>>,
    body: Bytes,
) -> impl IntoResponse {
    // The body is optional
    let req: RetryRequest = if body.is_empty() {
        RetryRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(req) => req,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e, None),
        }
    };

    let Ok(mut flow) = state.flow.try_lock() else {
        return flow_busy();
    };

    // A retry from the prompt only needs the secret
    let result = if matches!(flow.state(), ConnectionState::PasswordPrompt { .. }) {
        flow.submit_secret(req.secret.as_deref().unwrap_or(""))
            .await
            .map(|session| SelectOutcome::Connected { session })
    } else {
        match flow.retry().await {
            Ok(SelectOutcome::SecretRequired { target }) => match req.secret {
                Some(secret) => flow
                    .submit_secret(&secret)
                    .await
                    .map(|session| SelectOutcome::Connected { session }),
                None => Ok(SelectOutcome::SecretRequired { target }),
            },
            other => other,
        }
    };

    match result {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => connect_error_response(e),
    }
}

pub async fn handle_cancel<W: WifiCapability>(State(state): State<AppState<W>>) -> impl IntoResponse {
    let Ok(mut flow) = state.flow.try_lock() else {
        return flow_busy();
    };

    match flow.cancel() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => connect_error_response(e),
    }
}

// ============================================================================
// API: Device control
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OutputRequest {
    pub on: bool,
}

pub async fn handle_get_outputs<W: WifiCapability>(State(state): State<AppState<W>>) -> impl IntoResponse {
    let address = state
        .sessions
        .current_session()
        .map(|s| s.device_address)
        .unwrap_or_else(|| state.config.device_address.clone());
    Json(state.outputs.states(&address))
}

pub async fn handle_set_output<W: WifiCapability>(
    State(state): State<AppState<W>>,
    Path(id): Path<String>,
    Json(req): Json<OutputRequest>,
) -> impl IntoResponse {
    let Some(session) = state.sessions.current_session() else {
        return error_response(StatusCode::NOT_FOUND, "No current session", None);
    };

    match state.outputs.set(&session.device_address, &id, req.on).await {
        Ok(output) => Json(output).into_response(),
        Err(e) => device_error_response(e),
    }
}

pub async fn handle_set_all_outputs<W: WifiCapability>(
    State(state): State<AppState<W>>,
    Json(req): Json<OutputRequest>,
) -> impl IntoResponse {
    let Some(session) = state.sessions.current_session() else {
        return error_response(StatusCode::NOT_FOUND, "No current session", None);
    };

    match state.outputs.set_all(&session.device_address, req.on).await {
        Ok(outputs) => Json(outputs).into_response(),
        Err(e) => device_error_response(e),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub device_address: String,
    pub latency_ms: u64,
}

pub async fn handle_check_device<W: WifiCapability>(State(state): State<AppState<W>>) -> impl IntoResponse {
    let Some(session) = state.sessions.current_session() else {
        return error_response(StatusCode::NOT_FOUND, "No current session", None);
    };

    match state.device.check(&session.device_address).await {
        Ok(latency) => Json(CheckResponse {
            device_address: session.device_address,
            latency_ms: latency.as_millis() as u64,
        })
        .into_response(),
        Err(e) => device_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::{CurrentSession, MemoryKv, RegisteredDevice, SessionStore};
    use crate::device::{DeviceClient, OutputBoard};
    use crate::telemetry::Poller;
    use crate::wifi::mock::MockWifi;
    use crate::wifi::{ConnectionFlow, FlowSettings, ScannedNetwork};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn state_with(wifi: MockWifi) -> AppState<MockWifi> {
        let config = AppConfig {
            settle_delay: Duration::ZERO,
            ..AppConfig::default()
        };
        let wifi = Arc::new(wifi);
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        let device = DeviceClient::new(Duration::from_millis(200), Duration::from_millis(200));
        let poller = Arc::new(Poller::new(
            sessions.clone(),
            wifi.clone(),
            device.clone(),
            config.poll_interval,
            config.stabilization_window,
        ));
        let flow = ConnectionFlow::new(
            wifi,
            sessions.clone(),
            FlowSettings {
                default_network: config.default_network.clone(),
                fallback_secret: config.fallback_secret.clone(),
            },
            config.settle_delay,
            &config.device_address,
        );
        AppState {
            config,
            sessions,
            poller,
            flow: Arc::new(tokio::sync::Mutex::new(flow)),
            outputs: Arc::new(OutputBoard::new(device.clone())),
            device,
        }
    }

    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    fn bind_session(state: &AppState<MockWifi>, address: &str) {
        let device = RegisteredDevice::new("BatteryMonitorAP", "12345678", true, Utc::now());
        state.sessions.register_device(device.clone()).unwrap();
        state
            .sessions
            .set_current_session(CurrentSession::for_device(&device, address, Utc::now()))
            .unwrap();
    }

    fn network(ssid: &str, caps: &str) -> ScannedNetwork {
        ScannedNetwork {
            ssid: ssid.to_string(),
            level: Some(-50),
            capabilities: caps.to_string(),
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_get_session_missing() {
        let state = state_with(MockWifi::default());
        let resp = handle_get_session(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_reading_defaults() {
        let state = state_with(MockWifi::default());
        let resp = handle_get_reading(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["connected"], false);
        assert_eq!(body["reading"]["percentage"], 85);
        assert_eq!(body["reading"]["voltage"], 12.6);
    }

    #[tokio::test]
    async fn test_scan_then_connect_with_secret() {
        let state = state_with(MockWifi::with_networks(vec![
            network("BatteryMonitorAP", "[WPA2-PSK-CCMP]"),
            network("HomeWifi", "[WPA2-PSK-CCMP]"),
        ]));

        let resp = handle_scan(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let resp = handle_connect(
            State(state.clone()),
            Json(ConnectRequest {
                ssid: "BatteryMonitorAP".to_string(),
                secret: Some(String::new()),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["outcome"], "connected");

        let session = state.sessions.current_session().unwrap();
        assert_eq!(session.network_name, "BatteryMonitorAP");
        assert_eq!(state.sessions.devices()[0].secret, "12345678");
    }

    #[tokio::test]
    async fn test_connect_without_secret_prompts() {
        let state = state_with(MockWifi::with_networks(vec![network("esp32-garage", "[WPA2-PSK]")]));
        handle_scan(State(state.clone())).await;

        let resp = handle_connect(
            State(state.clone()),
            Json(ConnectRequest {
                ssid: "esp32-garage".to_string(),
                secret: None,
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["outcome"], "secretRequired");
        assert_eq!(body["target"]["ssid"], "esp32-garage");

        let resp = handle_retry(
            State(state.clone()),
            Bytes::from_static(br#"{"secret":"garagepass"}"#),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.sessions.current_session().is_some());
    }

    #[tokio::test]
    async fn test_retry_without_failure_conflicts() {
        let state = state_with(MockWifi::default());
        let resp = handle_retry(State(state.clone()), Bytes::new()).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = handle_retry(State(state), Bytes::from_static(b"not json")).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_connect_non_target_rejected() {
        let state = state_with(MockWifi::with_networks(vec![
            network("BatteryMonitorAP", "[WPA2-PSK]"),
            network("HomeWifi", "[WPA2-PSK]"),
        ]));
        handle_scan(State(state.clone())).await;

        let resp = handle_connect(
            State(state),
            Json(ConnectRequest {
                ssid: "HomeWifi".to_string(),
                secret: Some("secret".to_string()),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_scan_permission_denied() {
        let wifi = MockWifi::default();
        *wifi.permission.lock().unwrap() = false;
        let state = state_with(wifi);

        let resp = handle_scan(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body = body_json(resp).await;
        assert!(body["remediation"].as_str().unwrap().contains("Location permission"));
    }

    #[tokio::test]
    async fn test_cancel_from_idle_and_busy_flow() {
        let state = state_with(MockWifi::default());
        let resp = handle_cancel(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let _guard = state.flow.lock().await;
        let resp = handle_scan(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_reconnect_requires_secret() {
        let state = state_with(MockWifi::default());
        let device = RegisteredDevice::new("esp32-shed", "", true, Utc::now());
        state.sessions.register_device(device.clone()).unwrap();

        let resp = handle_reconnect_device(State(state.clone()), Path(device.id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = handle_reconnect_device(State(state), Path(1)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_device_clears_session() {
        let state = state_with(MockWifi::default());
        let device = RegisteredDevice::new("BatteryMonitorAP", "12345678", true, Utc::now());
        state.sessions.register_device(device.clone()).unwrap();
        state
            .sessions
            .set_current_session(CurrentSession::for_device(&device, "192.168.4.1", Utc::now()))
            .unwrap();

        let resp = handle_delete_device(State(state.clone()), Path(device.id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.sessions.current_session().is_none());

        let resp = handle_delete_device(State(state), Path(device.id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_set_output_without_session() {
        let state = state_with(MockWifi::default());
        let resp = handle_set_output(
            State(state),
            Path("headlamp".to_string()),
            Json(OutputRequest { on: true }),
        )
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_check_device_unreachable() {
        let state = state_with(MockWifi::default());
        let device = RegisteredDevice::new("BatteryMonitorAP", "12345678", true, Utc::now());
        // Nothing listens on the discard port
        state
            .sessions
            .set_current_session(CurrentSession::for_device(&device, "127.0.0.1:9", Utc::now()))
            .unwrap();

        let resp = handle_check_device(State(state)).await.into_response();
        assert!(resp.status() == StatusCode::BAD_GATEWAY || resp.status() == StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_outputs_track_commanded_state() {
        let addr = serve(axum::Router::new().route("/led", axum::routing::get(|| async { "ok" }))).await;
        let state = state_with(MockWifi::default());
        bind_session(&state, &addr);

        let resp = handle_set_output(
            State(state.clone()),
            Path("rearLight".to_string()),
            Json(OutputRequest { on: true }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["pin"], 3);
        assert_eq!(body["on"], true);

        let resp = handle_get_outputs(State(state.clone())).await.into_response();
        let body = body_json(resp).await;
        let outputs = body.as_array().unwrap();
        assert_eq!(outputs.len(), 6);
        assert_eq!(outputs[0]["id"], "headlamp");
        assert_eq!(outputs[3]["on"], true);
        assert_eq!(outputs.iter().filter(|o| o["on"] == true).count(), 1);

        let resp = handle_set_all_outputs(State(state.clone()), Json(OutputRequest { on: true }))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(handle_get_outputs(State(state.clone())).await.into_response()).await;
        assert!(body.as_array().unwrap().iter().all(|o| o["on"] == true));

        let resp = handle_set_output(
            State(state),
            Path("fogLight".to_string()),
            Json(OutputRequest { on: true }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats_range_query() {
        let addr = serve(axum::Router::new().route(
            "/",
            axum::routing::get(|| async { r#"{"voltage":12.4}"# }),
        ))
        .await;
        let state = state_with(MockWifi::default());
        bind_session(&state, &addr);
        state.poller.poll_once().await;

        let resp = handle_get_stats(State(state.clone()), Query(StatsQuery { range: StatsRange::Day }))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["range"], "24h");
        assert_eq!(body["voltage"]["samples"], 1);

        let resp = handle_get_stats(State(state), Query(StatsQuery::default()))
            .await
            .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["range"], "1h");
        assert_eq!(body["voltage"]["current"], 12.4);
    }
}
