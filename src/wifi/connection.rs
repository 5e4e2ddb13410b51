//! Connection state machine.
//!
//! `transition` is pure: given a state and an event it returns the next state
//! and the effect the driver must perform. Rejected events leave the state
//! untouched.

use serde::Serialize;

use super::{classify_networks, same_network, ConnectError, DiscoveredNetwork, ScannedNetwork};
use crate::db::RegisteredDevice;

/// Why a connection attempt ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    PermissionDenied,
    ScanUnavailable,
    ConnectionUnverified,
}

impl FailureReason {
    /// Guidance shown to the user alongside the failure.
    pub fn remediation(&self) -> &'static str {
        match self {
            FailureReason::PermissionDenied => {
                "Location permission is required to scan for WiFi networks."
            }
            FailureReason::ScanUnavailable => {
                "Unable to scan for WiFi networks. Please ensure you are running a development \
                 build on a physical device, location permissions are granted, and WiFi is enabled."
            }
            FailureReason::ConnectionUnverified => {
                "Unable to connect to the network. Please check the password and try again."
            }
        }
    }
}

/// The network a connection attempt is aimed at.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTarget {
    pub ssid: String,
    pub is_secured: bool,
    pub is_wep: bool,
    /// Set when reconnecting to an already registered device
    pub device_id: Option<i64>,
}

impl From<&DiscoveredNetwork> for ConnectTarget {
    fn from(n: &DiscoveredNetwork) -> Self {
        Self {
            ssid: n.ssid.clone(),
            is_secured: n.is_secured,
            is_wep: n.is_wep,
            device_id: None,
        }
    }
}

impl From<&RegisteredDevice> for ConnectTarget {
    fn from(d: &RegisteredDevice) -> Self {
        Self {
            ssid: d.network_name.clone(),
            is_secured: d.is_secured,
            is_wep: false,
            device_id: Some(d.id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConnectionState {
    Idle,
    Scanning,
    NetworkListed {
        networks: Vec<DiscoveredNetwork>,
    },
    PasswordPrompt {
        target: ConnectTarget,
    },
    Connecting {
        target: ConnectTarget,
        #[serde(skip_serializing)]
        secret: String,
    },
    Verified {
        target: ConnectTarget,
    },
    Failed {
        reason: FailureReason,
        target: Option<ConnectTarget>,
    },
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Scanning => "scanning",
            ConnectionState::NetworkListed { .. } => "listing networks",
            ConnectionState::PasswordPrompt { .. } => "waiting for a secret",
            ConnectionState::Connecting { .. } => "connecting",
            ConnectionState::Verified { .. } => "verified",
            ConnectionState::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    StartScan,
    PermissionResolved(bool),
    ScanCompleted(Result<Vec<ScannedNetwork>, String>),
    SelectNetwork(String),
    SubmitSecret(String),
    ConnectIssued(Result<(), String>),
    Settled,
    ActiveNetworkRead(Option<String>),
    Retry,
    Cancel,
    Dismiss,
    Reconnect(RegisteredDevice),
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::StartScan => "scan",
            ConnectionEvent::PermissionResolved(_) => "permission result",
            ConnectionEvent::ScanCompleted(_) => "scan result",
            ConnectionEvent::SelectNetwork(_) => "network selection",
            ConnectionEvent::SubmitSecret(_) => "secret entry",
            ConnectionEvent::ConnectIssued(_) => "connect result",
            ConnectionEvent::Settled => "settle",
            ConnectionEvent::ActiveNetworkRead(_) => "network readback",
            ConnectionEvent::Retry => "retry",
            ConnectionEvent::Cancel => "cancel",
            ConnectionEvent::Dismiss => "dismiss",
            ConnectionEvent::Reconnect(_) => "reconnect",
        }
    }
}

/// Work the driver performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    RequestPermission,
    Scan,
    Connect {
        ssid: String,
        secret: String,
        is_wep: bool,
    },
    AwaitSettle,
    ReadActiveNetwork,
    RecordConnection {
        target: ConnectTarget,
        secret: String,
    },
}

/// Fixed inputs to the transition function.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    /// Network name that is always a target and may use the fallback secret
    pub default_network: String,
    pub fallback_secret: String,
}

/// Compute the next state and effect for `event` in `state`.
pub fn transition(
    state: &ConnectionState,
    event: ConnectionEvent,
    settings: &FlowSettings,
) -> Result<(ConnectionState, Effect), ConnectError> {
    use ConnectionEvent as E;
    use ConnectionState as S;

    let invalid = |event: &ConnectionEvent| ConnectError::InvalidTransition {
        state: state.name(),
        event: event.name(),
    };

    let next = match (state, event) {
        (S::Idle | S::NetworkListed { .. } | S::Failed { .. } | S::Verified { .. }, E::StartScan) => {
            (S::Scanning, Effect::RequestPermission)
        }

        (S::Scanning, E::PermissionResolved(true)) => (S::Scanning, Effect::Scan),
        (S::Scanning, E::PermissionResolved(false)) => (
            S::Failed {
                reason: FailureReason::PermissionDenied,
                target: None,
            },
            Effect::None,
        ),

        (S::Scanning, E::ScanCompleted(result)) => {
            let networks = result
                .map(|raw| classify_networks(raw, &settings.default_network))
                .unwrap_or_default();
            if networks.is_empty() {
                (
                    S::Failed {
                        reason: FailureReason::ScanUnavailable,
                        target: None,
                    },
                    Effect::None,
                )
            } else {
                (S::NetworkListed { networks }, Effect::None)
            }
        }

        (S::NetworkListed { networks }, E::SelectNetwork(ssid)) => {
            let network = networks
                .iter()
                .find(|n| n.ssid == ssid && n.is_target_device)
                .ok_or(ConnectError::InvalidNetworkSelection(ssid))?;
            let target = ConnectTarget::from(network);
            if target.is_secured {
                (S::PasswordPrompt { target }, Effect::None)
            } else {
                connecting(target, String::new())
            }
        }

        (S::PasswordPrompt { target }, E::SubmitSecret(secret)) => {
            let secret = if !secret.trim().is_empty() {
                secret
            } else if target.ssid == settings.default_network {
                settings.fallback_secret.clone()
            } else {
                return Err(ConnectError::SecretRequired(target.ssid.clone()));
            };
            connecting(target.clone(), secret)
        }

        (S::Connecting { target, .. }, E::ConnectIssued(Err(_))) => failed_unverified(target),
        (S::Connecting { .. }, E::ConnectIssued(Ok(()))) => (state.clone(), Effect::AwaitSettle),
        (S::Connecting { .. }, E::Settled) => (state.clone(), Effect::ReadActiveNetwork),
        (S::Connecting { target, secret }, E::ActiveNetworkRead(active)) => {
            match active {
                Some(name) if same_network(&name, &target.ssid) => (
                    S::Verified {
                        target: target.clone(),
                    },
                    Effect::RecordConnection {
                        target: target.clone(),
                        secret: secret.clone(),
                    },
                ),
                _ => failed_unverified(target),
            }
        }

        (
            S::Failed {
                reason: FailureReason::ConnectionUnverified,
                target: Some(target),
            },
            E::Retry,
        ) => {
            if target.is_secured {
                (
                    S::PasswordPrompt {
                        target: target.clone(),
                    },
                    Effect::None,
                )
            } else {
                connecting(target.clone(), String::new())
            }
        }

        (S::Verified { .. }, E::Dismiss) => (S::Idle, Effect::None),

        (S::Scanning | S::Connecting { .. }, event @ E::Cancel) => return Err(invalid(&event)),
        (_, E::Cancel) => (S::Idle, Effect::None),

        (S::Idle | S::NetworkListed { .. } | S::Failed { .. } | S::Verified { .. }, E::Reconnect(device)) => {
            if !device.has_usable_secret() {
                return Err(ConnectError::ReRegistrationRequired(device.id));
            }
            connecting(ConnectTarget::from(&device), device.secret.clone())
        }

        (_, event) => return Err(invalid(&event)),
    };

    Ok(next)
}

fn connecting(target: ConnectTarget, secret: String) -> (ConnectionState, Effect) {
    let effect = Effect::Connect {
        ssid: target.ssid.clone(),
        secret: secret.clone(),
        is_wep: target.is_wep,
    };
    (ConnectionState::Connecting { target, secret }, effect)
}

fn failed_unverified(target: &ConnectTarget) -> (ConnectionState, Effect) {
    (
        ConnectionState::Failed {
            reason: FailureReason::ConnectionUnverified,
            target: Some(target.clone()),
        },
        Effect::None,
    )
}

/// Holds the current state and applies transitions to it.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    settings: FlowSettings,
}

impl ConnectionMachine {
    pub fn new(settings: FlowSettings) -> Self {
        Self {
            state: ConnectionState::Idle,
            settings,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Result<Effect, ConnectError> {
        let event_name = event.name();
        let (next, effect) = transition(&self.state, event, &self.settings)?;
        if next.name() != self.state.name() {
            tracing::debug!("Connection: {} -> {} on {}", self.state.name(), next.name(), event_name);
        }
        self.state = next;
        Ok(effect)
    }
}
