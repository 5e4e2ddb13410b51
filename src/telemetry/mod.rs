//! Telemetry module: polls the device and keeps the displayed reading.

mod battery;
mod history;
mod reading;

pub use battery::*;
pub use history::*;
pub use reading::*;

use crate::db::SessionStore;
use crate::device::{DeviceClient, DeviceTelemetry};
use crate::wifi::{same_network, WifiCapability};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// What display components consume.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub reading: Reading,
    pub connected: bool,
    /// Whether the poll loop is running
    pub polling: bool,
    pub target_network: Option<String>,
    pub device_name: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Mutable poll state shared by overlapping cycles; last write wins.
#[derive(Debug)]
struct PollState {
    reading: Reading,
    /// Last reading built from a real sample; synthetic values jitter around it
    last_known: Reading,
    connected: bool,
    /// Device the reading and history belong to
    device_id: Option<i64>,
    stabilizer: PercentageStabilizer,
    history: TelemetryHistory,
    updated_at: Option<DateTime<Utc>>,
}

impl PollState {
    fn new(stabilization_window: Duration) -> Self {
        let reading = Reading::default();
        Self {
            stabilizer: PercentageStabilizer::new(stabilization_window, reading.percentage),
            last_known: reading.clone(),
            reading,
            connected: false,
            device_id: None,
            history: TelemetryHistory::default(),
            updated_at: None,
        }
    }

    /// Start over when the session moves to another device.
    fn bind(&mut self, device_id: i64) {
        if self.device_id == Some(device_id) {
            return;
        }
        if let Some(previous) = self.device_id {
            tracing::info!(
                "Session moved from device {} to {}, discarding {} samples",
                previous,
                device_id,
                self.history.len()
            );
        }
        let reading = Reading::default();
        self.stabilizer.reset(reading.percentage);
        self.history.clear();
        self.last_known = reading.clone();
        self.reading = reading;
        self.device_id = Some(device_id);
    }

    fn apply_sample(&mut self, device_id: i64, sample: &DeviceTelemetry, connected: bool, now: Instant) {
        self.bind(device_id);
        let percentage = self.stabilizer.offer(sample.voltage, now);
        let at = Utc::now();
        self.reading = Reading::from_telemetry(sample, percentage);
        self.last_known = self.reading.clone();
        self.history.record(*sample, at);
        self.connected = connected;
        self.updated_at = Some(at);
    }

    fn apply_failure(&mut self, device_id: i64) {
        self.bind(device_id);
        self.reading = self.last_known.jittered(&mut rand::thread_rng());
        self.connected = false;
        self.updated_at = Some(Utc::now());
    }
}

struct PollContext<W> {
    sessions: Arc<SessionStore>,
    wifi: Arc<W>,
    client: DeviceClient,
    state: Arc<RwLock<PollState>>,
}

impl<W> Clone for PollContext<W> {
    fn clone(&self) -> Self {
        Self {
            sessions: self.sessions.clone(),
            wifi: self.wifi.clone(),
            client: self.client.clone(),
            state: self.state.clone(),
        }
    }
}

impl<W: WifiCapability> PollContext<W> {
    async fn run_cycle(&self) {
        let Some(session) = self.sessions.current_session() else {
            let mut state = self.state.write().await;
            if state.connected {
                tracing::info!("No current session, marking device disconnected");
            }
            state.connected = false;
            return;
        };

        // None when the platform could not tell us
        let on_network = match self.wifi.active_network_name().await {
            Ok(active) => Some(active.is_some_and(|name| same_network(&name, &session.network_name))),
            Err(e) => {
                tracing::debug!("Active network check failed: {}", e);
                None
            }
        };

        match self.client.fetch_telemetry(&session.device_address).await {
            Ok(sample) => {
                let mut state = self.state.write().await;
                state.apply_sample(session.device_id, &sample, on_network.unwrap_or(true), Instant::now());
            }
            Err(e) => {
                tracing::debug!("Telemetry fetch from {} failed: {}", session.device_address, e);
                let mut state = self.state.write().await;
                state.apply_failure(session.device_id);
            }
        }
    }
}

/// Periodically polls the device of the current session.
pub struct Poller<W> {
    ctx: PollContext<W>,
    interval: Duration,
    stop: Mutex<Option<tokio::sync::broadcast::Sender<()>>>,
}

impl<W: WifiCapability> Poller<W> {
    pub fn new(
        sessions: Arc<SessionStore>,
        wifi: Arc<W>,
        client: DeviceClient,
        interval: Duration,
        stabilization_window: Duration,
    ) -> Self {
        Self {
            ctx: PollContext {
                sessions,
                wifi,
                client,
                state: Arc::new(RwLock::new(PollState::new(stabilization_window))),
            },
            interval,
            stop: Mutex::new(None),
        }
    }

    /// Start the poll loop. Does nothing if it is already running.
    pub fn start(&self) {
        let Ok(mut stop) = self.stop.lock() else {
            tracing::error!("Poller: stop handle poisoned, not starting");
            return;
        };
        if stop.is_some() {
            return;
        }

        let (tx, mut rx) = tokio::sync::broadcast::channel(1);
        *stop = Some(tx);

        let ctx = self.ctx.clone();
        let period = self.interval;
        tracing::info!("Poller: starting with interval {:?}", period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        // Cycles are tick-driven and may overlap a slow fetch
                        let ctx = ctx.clone();
                        tokio::spawn(async move { ctx.run_cycle().await });
                    }
                }
            }

            tracing::info!("Poller: stopped");
        });
    }

    /// Run a single poll cycle immediately.
    pub async fn poll_once(&self) {
        self.ctx.run_cycle().await;
    }

    pub async fn snapshot(&self) -> TelemetrySnapshot {
        let session = self.ctx.sessions.current_session();
        let state = self.ctx.state.read().await;
        TelemetrySnapshot {
            reading: state.reading.clone(),
            connected: state.connected,
            polling: self.is_running(),
            target_network: session.as_ref().map(|s| s.network_name.clone()),
            device_name: session.map(|s| s.device_name),
            updated_at: state.updated_at,
        }
    }

    pub async fn stats(&self, range: StatsRange) -> TelemetryStats {
        self.ctx.state.read().await.history.stats(range, Utc::now())
    }
}

impl<W> Poller<W> {
    /// Stop the poll loop.
    pub fn stop(&self) {
        if let Ok(mut stop) = self.stop.lock() {
            if let Some(tx) = stop.take() {
                let _ = tx.send(());
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop.lock().map(|s| s.is_some()).unwrap_or(false)
    }
}

impl<W> Drop for Poller<W> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CurrentSession, MemoryKv, RegisteredDevice};
    use crate::wifi::mock::MockWifi;
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: Duration = Duration::from_secs(600);

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr.to_string()
    }

    fn device_router(body: &'static str) -> Router {
        Router::new().route("/", get(move || async move { body }))
    }

    fn bind(sessions: &SessionStore, address: &str) -> RegisteredDevice {
        let device = RegisteredDevice::new("BatteryMonitorAP", "12345678", true, Utc::now());
        sessions.register_device(device.clone()).unwrap();
        sessions
            .set_current_session(CurrentSession::for_device(&device, address, Utc::now()))
            .unwrap();
        device
    }

    fn poller(sessions: Arc<SessionStore>, wifi: MockWifi) -> Poller<MockWifi> {
        Poller::new(
            sessions,
            Arc::new(wifi),
            DeviceClient::new(Duration::from_millis(300), Duration::from_millis(300)),
            Duration::from_millis(20),
            WINDOW,
        )
    }

    #[tokio::test]
    async fn test_successful_poll() {
        let addr = serve(device_router(
            r#"{"voltage":12.8,"current1":2.0,"current2":1.5,"temperature":26}"#,
        ))
        .await;
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        bind(&sessions, &addr);
        let wifi = MockWifi::default();
        wifi.set_active(Some("\"BatteryMonitorAP\""));
        let poller = poller(sessions, wifi);

        poller.poll_once().await;
        let snap = poller.snapshot().await;

        assert!(snap.connected);
        assert_eq!(snap.reading.voltage, 12.8);
        assert_eq!(snap.reading.percentage, 100);
        assert_eq!(snap.reading.status, BatteryStatus::Excellent);
        assert_eq!(snap.target_network.as_deref(), Some("BatteryMonitorAP"));
        assert!(snap.updated_at.is_some());
        assert_eq!(poller.stats(StatsRange::Hour).await.voltage.unwrap().samples, 1);
    }

    #[tokio::test]
    async fn test_percentage_held_within_window() {
        let addr = serve(Router::new().route(
            "/",
            get({
                let calls = Arc::new(AtomicUsize::new(0));
                move || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            r#"{"voltage":12.8}"#
                        } else {
                            r#"{"voltage":11.0}"#
                        }
                    }
                }
            }),
        ))
        .await;
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        bind(&sessions, &addr);
        let wifi = MockWifi::default();
        wifi.set_active(Some("BatteryMonitorAP"));
        let poller = poller(sessions, wifi);

        poller.poll_once().await;
        poller.poll_once().await;
        let snap = poller.snapshot().await;

        // Voltage and status follow the device, percentage does not
        assert_eq!(snap.reading.voltage, 11.0);
        assert_eq!(snap.reading.status, BatteryStatus::Critical);
        assert_eq!(snap.reading.percentage, 100);
    }

    #[tokio::test]
    async fn test_fetch_failure_jitters_and_keeps_percentage() {
        let addr = serve(Router::new().route(
            "/",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
        ))
        .await;
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        bind(&sessions, &addr);
        let wifi = MockWifi::default();
        wifi.set_active(Some("BatteryMonitorAP"));
        let poller = poller(sessions, wifi);

        let before = poller.snapshot().await.reading;
        poller.poll_once().await;
        let snap = poller.snapshot().await;

        assert!(!snap.connected);
        assert_eq!(snap.reading.percentage, before.percentage);
        assert!((snap.reading.voltage - before.voltage).abs() <= 0.1 + 1e-9);
        assert!(poller.stats(StatsRange::Hour).await.voltage.is_none());
    }

    #[tokio::test]
    async fn test_fetch_timeout_disconnects() {
        let addr = serve(Router::new().route(
            "/",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "{}"
            }),
        ))
        .await;
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        bind(&sessions, &addr);
        let poller = poller(sessions, MockWifi::default());

        let before = poller.snapshot().await.reading;
        poller.poll_once().await;
        let snap = poller.snapshot().await;
        assert!(!snap.connected);
        assert_eq!(snap.reading.percentage, before.percentage);
        assert!((snap.reading.voltage - before.voltage).abs() <= 0.1 + 1e-9);
    }

    #[tokio::test]
    async fn test_wrong_network_is_disconnected() {
        let addr = serve(device_router(r#"{"voltage":12.2}"#)).await;
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        bind(&sessions, &addr);
        let wifi = MockWifi::default();
        wifi.set_active(Some("HomeWifi"));
        let poller = poller(sessions, wifi);

        poller.poll_once().await;
        let snap = poller.snapshot().await;
        assert!(!snap.connected);
        assert_eq!(snap.reading.voltage, 12.2);
    }

    #[tokio::test]
    async fn test_deleted_session_skips_fetch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve(Router::new().route(
            "/",
            get({
                let hits = hits.clone();
                move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                    async { r#"{"voltage":12.7}"# }
                }
            }),
        ))
        .await;
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        let device = bind(&sessions, &addr);
        let wifi = MockWifi::default();
        wifi.set_active(Some("BatteryMonitorAP"));
        let poller = poller(sessions.clone(), wifi);

        poller.poll_once().await;
        assert!(poller.snapshot().await.connected);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sessions.delete_device(device.id).unwrap();
        poller.poll_once().await;

        let snap = poller.snapshot().await;
        assert!(!snap.connected);
        assert!(snap.target_network.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let addr = serve(device_router(r#"{"voltage":12.5}"#)).await;
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        bind(&sessions, &addr);
        let wifi = MockWifi::default();
        wifi.set_active(Some("BatteryMonitorAP"));
        let poller = poller(sessions, wifi);

        poller.start();
        poller.start();
        assert!(poller.is_running());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let snap = poller.snapshot().await;
        assert!(snap.connected);
        assert!(snap.polling);
        assert_eq!(snap.reading.voltage, 12.5);

        poller.stop();
        assert!(!poller.is_running());
        assert!(!poller.snapshot().await.polling);
    }

    #[test]
    fn test_failures_stay_around_last_real_reading() {
        let mut state = PollState::new(WINDOW);
        let sample = DeviceTelemetry {
            voltage: 12.2,
            current1: 3.0,
            current2: 1.0,
            temperature: 27.0,
        };
        state.apply_sample(7, &sample, true, Instant::now());
        let percentage = state.reading.percentage;

        for _ in 0..1000 {
            state.apply_failure(7);
            assert!((state.reading.voltage - 12.2).abs() <= 0.1 + 1e-9);
            assert!((state.reading.current1 - 3.0).abs() <= 0.25 + 1e-9);
            assert!((state.reading.current2 - 1.0).abs() <= 0.15 + 1e-9);
            assert_eq!(state.reading.percentage, percentage);
            assert_eq!(state.reading.temperature, 27.0);
        }
        assert!(!state.connected);
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_switching_device_resets_percentage_and_stats() {
        let first = serve(device_router(r#"{"voltage":12.8}"#)).await;
        let second = serve(device_router(r#"{"voltage":12.0}"#)).await;
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        bind(&sessions, &first);
        let wifi = MockWifi::default();
        wifi.set_active(Some("esp32-van"));
        let poller = poller(sessions.clone(), wifi);

        poller.poll_once().await;
        assert_eq!(poller.snapshot().await.reading.percentage, 100);

        let other = RegisteredDevice {
            id: 99,
            ..RegisteredDevice::new("esp32-van", "vanpass", true, Utc::now())
        };
        sessions.register_device(other.clone()).unwrap();
        sessions
            .set_current_session(CurrentSession::for_device(&other, &second, Utc::now()))
            .unwrap();
        poller.poll_once().await;

        let snap = poller.snapshot().await;
        assert!(snap.connected);
        assert_eq!(snap.reading.voltage, 12.0);
        assert_eq!(snap.reading.percentage, 62);
        assert_eq!(snap.device_name.as_deref(), Some("Device (esp32-van)"));

        let stats = poller.stats(StatsRange::Hour).await;
        let voltage = stats.voltage.unwrap();
        assert_eq!(voltage.samples, 1);
        assert_eq!(voltage.max, 12.0);
    }

    #[tokio::test]
    async fn test_dropping_poller_stops_loop() {
        let hits = Arc::new(AtomicUsize::new(0));
        let addr = serve(Router::new().route(
            "/",
            get({
                let hits = hits.clone();
                move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                    async { r#"{"voltage":12.5}"# }
                }
            }),
        ))
        .await;
        let sessions = Arc::new(SessionStore::load(Arc::new(MemoryKv::new())));
        bind(&sessions, &addr);
        let poller = poller(sessions, MockWifi::default());

        poller.start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(poller);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let after_drop = hits.load(Ordering::SeqCst);
        assert!(after_drop > 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after_drop);
    }
}
