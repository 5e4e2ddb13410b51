//! WiFi capability backed by NetworkManager's `nmcli`.

use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use tokio::process::Command;

use super::{ScannedNetwork, WifiCapability, WifiError};

const SCAN_ARGS: &[&str] = &["-t", "-f", "SSID,SIGNAL,SECURITY", "device", "wifi", "list", "--rescan", "yes"];
const ACTIVE_ARGS: &[&str] = &["-t", "-f", "ACTIVE,SSID", "device", "wifi", "list"];

/// Drives the host's WiFi through `nmcli` in terse mode.
#[derive(Debug, Clone, Default)]
pub struct NmcliWifi {
    /// Interface to use; NetworkManager picks one when unset
    pub interface: Option<String>,
}

impl NmcliWifi {
    pub fn new(interface: Option<String>) -> Self {
        Self { interface }
    }

    /// Full argument list for a subcommand, scoped to the interface if one is set.
    fn command_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = args.to_vec();
        if let Some(iface) = &self.interface {
            full.extend(["ifname", iface.as_str()]);
        }
        full
    }

    async fn run(&self, args: &[&str]) -> Result<String, WifiError> {
        let mut cmd = Command::new("nmcli");
        cmd.args(self.command_args(args));

        let output = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => WifiError::Unsupported("nmcli is not installed".to_string()),
                _ => WifiError::Command(format!("failed to execute nmcli: {}", e)),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WifiError::Command(format!("nmcli failed: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl WifiCapability for NmcliWifi {
    async fn scan(&self) -> Result<Vec<ScannedNetwork>, WifiError> {
        let output = self.run(SCAN_ARGS).await?;
        Ok(parse_scan_output(&output))
    }

    async fn connect(&self, ssid: &str, secret: &str, is_wep: bool, is_hidden: bool) -> Result<(), WifiError> {
        let mut args = vec!["device", "wifi", "connect", ssid];
        if !secret.is_empty() {
            args.extend(["password", secret]);
            if is_wep {
                args.extend(["wep-key-type", "key"]);
            }
        }
        if is_hidden {
            args.extend(["hidden", "yes"]);
        }

        self.run(&args).await?;
        tracing::info!("nmcli: connect issued for {}", ssid);
        Ok(())
    }

    async fn active_network_name(&self) -> Result<Option<String>, WifiError> {
        let output = self.run(ACTIVE_ARGS).await?;
        Ok(parse_active_output(&output))
    }
}

/// Convert NetworkManager's 0-100 signal quality to approximate dBm.
pub fn quality_to_dbm(quality: i32) -> i32 {
    quality.clamp(0, 100) / 2 - 100
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse `nmcli -t -f SSID,SIGNAL,SECURITY device wifi list` output.
fn parse_scan_output(output: &str) -> Vec<ScannedNetwork> {
    static LINE: OnceLock<Regex> = OnceLock::new();
    let re = LINE.get_or_init(|| {
        Regex::new(r"^(?P<ssid>(?:[^:\\]|\\.)*):(?P<signal>\d*):(?P<security>.*)$").unwrap()
    });

    output
        .lines()
        .filter_map(|line| re.captures(line.trim_end()))
        .map(|caps| ScannedNetwork {
            ssid: unescape(&caps["ssid"]),
            level: caps["signal"].parse::<i32>().ok().map(quality_to_dbm),
            capabilities: caps["security"].to_string(),
        })
        .collect()
}

/// Parse `nmcli -t -f ACTIVE,SSID device wifi` output.
fn parse_active_output(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("yes:"))
        .map(|ssid| unescape(ssid.trim_end()))
        .filter(|ssid| !ssid.is_empty())
}
