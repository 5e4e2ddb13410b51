//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::AppConfig;
use crate::db::SessionStore;
use crate::device::{DeviceClient, OutputBoard};
use crate::telemetry::Poller;
use crate::wifi::{ConnectionFlow, WifiCapability};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
pub struct AppState<W> {
    pub config: AppConfig,
    pub sessions: Arc<SessionStore>,
    pub poller: Arc<Poller<W>>,
    /// One connection attempt at a time
    pub flow: Arc<tokio::sync::Mutex<ConnectionFlow<W>>>,
    pub device: DeviceClient,
    pub outputs: Arc<OutputBoard>,
}

// Derive would require W: Clone
impl<W> Clone for AppState<W> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            poller: self.poller.clone(),
            flow: self.flow.clone(),
            device: self.device.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

/// Local API server for batlink.
pub struct Server<W> {
    state: AppState<W>,
}

impl<W: WifiCapability> Server<W> {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: AppConfig,
        sessions: Arc<SessionStore>,
        poller: Arc<Poller<W>>,
        flow: ConnectionFlow<W>,
        device: DeviceClient,
    ) -> Self {
        Self {
            state: AppState {
                config,
                sessions,
                poller,
                flow: Arc::new(tokio::sync::Mutex::new(flow)),
                outputs: Arc::new(OutputBoard::new(device.clone())),
                device,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            // Telemetry
            .route("/api/reading", get(handlers::handle_get_reading::<W>))
            .route("/api/stats", get(handlers::handle_get_stats::<W>))
            // Registered devices and session
            .route("/api/devices", get(handlers::handle_get_devices::<W>))
            .route("/api/devices/{id}", axum::routing::delete(handlers::handle_delete_device::<W>))
            .route("/api/devices/{id}/connect", post(handlers::handle_reconnect_device::<W>))
            .route(
                "/api/session",
                get(handlers::handle_get_session::<W>).delete(handlers::handle_clear_session::<W>),
            )
            // Connection flow
            .route("/api/scan", post(handlers::handle_scan::<W>))
            .route(
                "/api/connect",
                get(handlers::handle_get_connection::<W>).post(handlers::handle_connect::<W>),
            )
            .route("/api/connect/retry", post(handlers::handle_retry::<W>))
            .route("/api/connect/cancel", post(handlers::handle_cancel::<W>))
            // Device control
            .route("/api/outputs", get(handlers::handle_get_outputs::<W>))
            .route("/api/outputs/all", post(handlers::handle_set_all_outputs::<W>))
            .route("/api/outputs/{id}", post(handlers::handle_set_output::<W>))
            .route("/api/device/check", get(handlers::handle_check_device::<W>))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Local API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
