//! Async driver executing connection effects.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::{
    ConnectError, ConnectTarget, ConnectionEvent, ConnectionMachine, ConnectionState,
    DiscoveredNetwork, Effect, FailureReason, FlowSettings, WifiCapability,
};
use crate::db::{CurrentSession, SessionStore};

/// Result of choosing a network or retrying.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SelectOutcome {
    SecretRequired { target: ConnectTarget },
    Connected { session: CurrentSession },
}

/// Runs the connection state machine against the platform and the store.
pub struct ConnectionFlow<W> {
    machine: ConnectionMachine,
    wifi: Arc<W>,
    sessions: Arc<SessionStore>,
    settle_delay: Duration,
    device_address: String,
}

impl<W: WifiCapability> ConnectionFlow<W> {
    pub fn new(
        wifi: Arc<W>,
        sessions: Arc<SessionStore>,
        settings: FlowSettings,
        settle_delay: Duration,
        device_address: &str,
    ) -> Self {
        Self {
            machine: ConnectionMachine::new(settings),
            wifi,
            sessions,
            settle_delay,
            device_address: device_address.to_string(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        self.machine.state()
    }

    /// Scan for networks and return them classified and sorted.
    pub async fn scan(&mut self) -> Result<Vec<DiscoveredNetwork>, ConnectError> {
        let effect = self.machine.handle(ConnectionEvent::StartScan)?;
        self.drive(effect).await?;

        match self.machine.state() {
            ConnectionState::NetworkListed { networks } => {
                tracing::info!("Scan found {} networks", networks.len());
                Ok(networks.clone())
            }
            _ => Err(self.failure()),
        }
    }

    /// Choose a listed network. Open networks are connected right away.
    pub async fn select(&mut self, ssid: &str) -> Result<SelectOutcome, ConnectError> {
        let effect = self
            .machine
            .handle(ConnectionEvent::SelectNetwork(ssid.to_string()))?;
        self.prompt_or_finish(effect).await
    }

    /// Provide the secret for the network waiting in the prompt.
    pub async fn submit_secret(&mut self, secret: &str) -> Result<CurrentSession, ConnectError> {
        let effect = self
            .machine
            .handle(ConnectionEvent::SubmitSecret(secret.to_string()))?;
        self.finish(effect).await
    }

    /// Retry the network of a failed attempt.
    pub async fn retry(&mut self) -> Result<SelectOutcome, ConnectError> {
        let effect = self.machine.handle(ConnectionEvent::Retry)?;
        self.prompt_or_finish(effect).await
    }

    pub fn cancel(&mut self) -> Result<(), ConnectError> {
        self.machine.handle(ConnectionEvent::Cancel)?;
        Ok(())
    }

    /// Reconnect to a registered device using its cached secret.
    pub async fn reconnect(&mut self, device_id: i64) -> Result<CurrentSession, ConnectError> {
        let device = self
            .sessions
            .device(device_id)
            .ok_or(ConnectError::UnknownDevice(device_id))?;
        let effect = self.machine.handle(ConnectionEvent::Reconnect(device))?;
        self.finish(effect).await
    }

    async fn prompt_or_finish(&mut self, effect: Effect) -> Result<SelectOutcome, ConnectError> {
        if let ConnectionState::PasswordPrompt { target } = self.machine.state() {
            return Ok(SelectOutcome::SecretRequired {
                target: target.clone(),
            });
        }
        let session = self.finish(effect).await?;
        Ok(SelectOutcome::Connected { session })
    }

    async fn finish(&mut self, effect: Effect) -> Result<CurrentSession, ConnectError> {
        match self.drive(effect).await? {
            Some(session) => Ok(session),
            None => Err(self.failure()),
        }
    }

    /// Perform effects and feed their results back until the machine rests.
    async fn drive(&mut self, mut effect: Effect) -> Result<Option<CurrentSession>, ConnectError> {
        loop {
            let event = match effect {
                Effect::None => return Ok(None),
                Effect::RequestPermission => {
                    ConnectionEvent::PermissionResolved(self.wifi.request_scan_permission().await)
                }
                Effect::Scan => ConnectionEvent::ScanCompleted(self.wifi.scan().await.map_err(|e| {
                    tracing::warn!("WiFi scan failed: {}", e);
                    e.to_string()
                })),
                Effect::Connect { ssid, secret, is_wep } => {
                    tracing::info!("Connecting to {}", ssid);
                    let result = self.wifi.connect(&ssid, &secret, is_wep, false).await;
                    ConnectionEvent::ConnectIssued(result.map_err(|e| {
                        tracing::warn!("Connect to {} failed: {}", ssid, e);
                        e.to_string()
                    }))
                }
                Effect::AwaitSettle => {
                    tokio::time::sleep(self.settle_delay).await;
                    ConnectionEvent::Settled
                }
                Effect::ReadActiveNetwork => {
                    let active = self.wifi.active_network_name().await.unwrap_or_else(|e| {
                        tracing::warn!("Could not read active network: {}", e);
                        None
                    });
                    ConnectionEvent::ActiveNetworkRead(active)
                }
                Effect::RecordConnection { target, secret } => {
                    let recorded = self.sessions.record_connection(
                        target.device_id,
                        &target.ssid,
                        &secret,
                        target.is_secured,
                        &self.device_address,
                        Utc::now(),
                    );
                    self.machine.handle(ConnectionEvent::Dismiss)?;
                    return Ok(Some(recorded?));
                }
            };
            effect = self.machine.handle(event)?;
        }
    }

    /// Error describing why the machine is not where the caller expected.
    fn failure(&self) -> ConnectError {
        match self.machine.state() {
            ConnectionState::Failed { reason, target } => {
                tracing::warn!("Connection flow failed: {:?}", reason);
                match reason {
                    FailureReason::PermissionDenied => ConnectError::PermissionDenied,
                    FailureReason::ScanUnavailable => {
                        ConnectError::ScanUnavailable(reason.remediation().to_string())
                    }
                    FailureReason::ConnectionUnverified => ConnectError::ConnectionUnverified(
                        target.as_ref().map(|t| t.ssid.clone()).unwrap_or_default(),
                    ),
                }
            }
            other => ConnectError::InvalidTransition {
                state: other.name(),
                event: "completion",
            },
        }
    }
}
