//! Probe sources: where liveness answers come from
//!
//! `SystemPing` shells out to the platform `ping` binary. `HttpSessionSource`
//! asks the device-management API for the PPPoE sessions a router holds.

use crate::error::{GatewayError, ProbeError};
use crate::gateway::{endpoint, HttpGateway};
use log::{debug, trace};
use serde::Deserialize;
use std::process::Command;
use std::sync::Arc;

/// Summary of one ping run
#[derive(Debug, Clone, PartialEq)]
pub struct PingReply {
    pub transmitted: u32,
    pub received: u32,
    pub packet_loss_percent: f64,
    /// Average round trip; absent when nothing came back
    pub avg_rtt_ms: Option<f64>,
}

impl PingReply {
    pub fn is_reachable(&self) -> bool {
        self.received > 0
    }
}

/// An active PPPoE session as reported by the device that terminates it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionSnapshot {
    #[serde(alias = "name")]
    pub session_name: String,
    #[serde(default)]
    pub bytes_in: u64,
    #[serde(default)]
    pub bytes_out: u64,
}

#[cfg_attr(test, mockall::automock)]
pub trait PingSource: Send + Sync {
    fn ping(&self, address: &str) -> Result<PingReply, ProbeError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait SessionSource: Send + Sync {
    /// Every session currently active on `device_id`
    fn active_sessions(&self, device_id: &str) -> Result<Vec<SessionSnapshot>, ProbeError>;
}

/// ICMP probe through the system `ping` binary
pub struct SystemPing {
    command: String,
    count: u32,
    timeout_secs: u64,
}

impl SystemPing {
    pub fn new(command: impl Into<String>, count: u32, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            count: count.max(1),
            timeout_secs: timeout_secs.max(1),
        }
    }
}

impl PingSource for SystemPing {
    fn ping(&self, address: &str) -> Result<PingReply, ProbeError> {
        if address.trim().is_empty() || address.starts_with('-') {
            return Err(ProbeError::Spawn(format!("invalid probe address '{}'", address)));
        }

        let output = Command::new(&self.command)
            .args([
                "-c",
                &self.count.to_string(),
                "-W",
                &self.timeout_secs.to_string(),
                "-q",
                address,
            ])
            .output()
            .map_err(|e| ProbeError::Spawn(format!("{}: {}", self.command, e)))?;

        // ping exits non-zero on total loss but still prints its summary
        let stdout = String::from_utf8_lossy(&output.stdout);
        trace!("ping {} -> {:?}: {}", address, output.status, stdout);
        parse_ping_summary(&stdout)
    }
}

fn leading_number<T: std::str::FromStr>(text: &str) -> Option<T> {
    text.split_whitespace().next()?.trim_end_matches('%').parse().ok()
}

/// Parse the summary block printed by iputils and BSD ping
///
/// ```text
/// 3 packets transmitted, 2 received, 33.3333% packet loss, time 2003ms
/// rtt min/avg/max/mdev = 9.120/10.500/11.880/1.380 ms
/// ```
pub fn parse_ping_summary(output: &str) -> Result<PingReply, ProbeError> {
    let counts = output
        .lines()
        .find(|line| line.contains("packets transmitted"))
        .ok_or_else(|| ProbeError::Parse("no packet summary in ping output".to_string()))?;

    let mut transmitted = None;
    let mut received = None;
    let mut loss = None;
    for part in counts.split(',').map(str::trim) {
        if part.contains("transmitted") {
            transmitted = leading_number::<u32>(part);
        } else if part.contains("received") {
            received = leading_number::<u32>(part);
        } else if part.contains("packet loss") {
            loss = leading_number::<f64>(part);
        }
    }

    let transmitted =
        transmitted.ok_or_else(|| ProbeError::Parse(format!("transmitted count: {}", counts)))?;
    let received = received.ok_or_else(|| ProbeError::Parse(format!("received count: {}", counts)))?;
    let packet_loss_percent = match loss {
        Some(loss) => loss.clamp(0.0, 100.0),
        None if transmitted > 0 => {
            f64::from(transmitted.saturating_sub(received)) * 100.0 / f64::from(transmitted)
        }
        None => 100.0,
    };

    let avg_rtt_ms = output
        .lines()
        .find(|line| line.contains("min/avg/max"))
        .and_then(|line| line.split('=').nth(1))
        .and_then(|values| values.trim().split('/').nth(1))
        .and_then(|avg| avg.trim().parse::<f64>().ok())
        .filter(|_| received > 0);

    Ok(PingReply {
        transmitted,
        received,
        packet_loss_percent,
        avg_rtt_ms,
    })
}

#[derive(Debug, Deserialize)]
struct SessionsResponse {
    sessions: Vec<SessionSnapshot>,
}

/// Session listing from the device-management API
pub struct HttpSessionSource {
    gateway: Arc<HttpGateway>,
    base_url: String,
}

impl HttpSessionSource {
    pub fn new(gateway: Arc<HttpGateway>, base_url: impl Into<String>) -> Self {
        Self {
            gateway,
            base_url: base_url.into(),
        }
    }
}

impl SessionSource for HttpSessionSource {
    fn active_sessions(&self, device_id: &str) -> Result<Vec<SessionSnapshot>, ProbeError> {
        let url = endpoint(&self.base_url, &format!("devices/{}/sessions", device_id));
        let response: SessionsResponse = self.gateway.get_json(&url).map_err(|e| match e {
            GatewayError::Decode(detail) => ProbeError::Parse(detail),
            other => ProbeError::Transport(other.to_string()),
        })?;
        debug!("Device {} reports {} sessions", device_id, response.sessions.len());
        Ok(response.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iputils_summary() {
        let output = "PING 10.0.0.5 (10.0.0.5) 56(84) bytes of data.\n\n\
                      --- 10.0.0.5 ping statistics ---\n\
                      3 packets transmitted, 3 received, 0% packet loss, time 2003ms\n\
                      rtt min/avg/max/mdev = 9.120/10.500/11.880/1.380 ms\n";
        let reply = parse_ping_summary(output).unwrap();
        assert_eq!(reply.transmitted, 3);
        assert_eq!(reply.received, 3);
        assert_eq!(reply.packet_loss_percent, 0.0);
        assert_eq!(reply.avg_rtt_ms, Some(10.5));
        assert!(reply.is_reachable());
    }

    #[test]
    fn test_parse_bsd_summary_with_partial_loss() {
        let output = "--- 10.0.0.5 ping statistics ---\n\
                      3 packets transmitted, 2 packets received, 33.3% packet loss\n\
                      round-trip min/avg/max/stddev = 20.1/25.0/29.9/4.9 ms\n";
        let reply = parse_ping_summary(output).unwrap();
        assert_eq!(reply.received, 2);
        assert_eq!(reply.packet_loss_percent, 33.3);
        assert_eq!(reply.avg_rtt_ms, Some(25.0));
    }

    #[test]
    fn test_parse_total_loss() {
        let output = "--- 10.0.0.9 ping statistics ---\n\
                      3 packets transmitted, 0 received, +3 errors, 100% packet loss, time 2040ms\n";
        let reply = parse_ping_summary(output).unwrap();
        assert!(!reply.is_reachable());
        assert_eq!(reply.packet_loss_percent, 100.0);
        assert_eq!(reply.avg_rtt_ms, None);
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(matches!(
            parse_ping_summary("ping: unknown host nowhere"),
            Err(ProbeError::Parse(_))
        ));
    }

    #[test]
    fn test_system_ping_rejects_option_like_address() {
        let ping = SystemPing::new("ping", 1, 1);
        assert!(matches!(ping.ping("-f"), Err(ProbeError::Spawn(_))));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let ping = SystemPing::new("/nonexistent/ping", 1, 1);
        assert!(matches!(ping.ping("10.0.0.1"), Err(ProbeError::Spawn(_))));
    }

    #[test]
    fn test_session_payload_accepts_name_alias() {
        let payload = r#"{"sessions":[{"name":"pppoe-c1","bytes_in":10,"bytes_out":20},{"session_name":"pppoe-c2"}]}"#;
        let parsed: SessionsResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.sessions[0].session_name, "pppoe-c1");
        assert_eq!(parsed.sessions[1].bytes_in, 0);
    }
}
