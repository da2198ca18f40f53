//! Companion agent wire protocol.
//!
//! The remote process agent answers JSON datagrams:
//! `{"cmd":"check","name":"nginx"}` -> `{"ok":true,"process":"nginx","running":true}`,
//! `{"cmd":"health"}` -> `{"ok":true}`, anything unknown or malformed ->
//! `{"ok":false,"error":"..."}`. These types are shared between the
//! `processes` probe and the `hostwatch-agent` binary.

use std::net::UdpSocket;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Default UDP port of the companion agent.
pub const DEFAULT_AGENT_PORT: u16 = 8765;

const MAX_RESPONSE: usize = 64 * 1024;

/// Request sent to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "lowercase")]
pub enum AgentRequest {
    /// Is the named process currently running?
    Check { name: String },
    /// Liveness probe.
    Health,
}

/// Response returned by the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn health_ok() -> Self {
        Self { ok: true, ..Self::default() }
    }

    pub fn check(process: &str, running: bool) -> Self {
        Self { ok: true, process: Some(process.to_string()), running: Some(running), ..Self::default() }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { ok: false, error: Some(error.into()), ..Self::default() }
    }
}

/// Blocking request/response client over a throwaway UDP socket.
///
/// Every call carries the configured timeout; a lost datagram surfaces as a
/// timeout error, never a hang.
#[derive(Debug, Clone)]
pub struct AgentClient {
    host: String,
    port: u16,
    timeout: Duration,
}

impl AgentClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self { host: host.to_string(), port, timeout: timeout.max(Duration::from_millis(100)) }
    }

    /// Send one request and wait for one response.
    pub fn query(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("bind query socket")?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.set_write_timeout(Some(self.timeout))?;

        let payload = serde_json::to_vec(request)?;
        socket
            .send_to(&payload, (self.host.as_str(), self.port))
            .with_context(|| format!("send to {}:{}", self.host, self.port))?;

        let mut buf = vec![0u8; MAX_RESPONSE];
        let (len, _) = socket
            .recv_from(&mut buf)
            .with_context(|| format!("no response from {}:{}", self.host, self.port))?;
        let response: AgentResponse = serde_json::from_slice(&buf[..len]).context("decode response")?;
        Ok(response)
    }

    /// Whether the named process is running on the agent's machine.
    pub fn check_process(&self, name: &str) -> Result<bool> {
        let response = self.query(&AgentRequest::Check { name: name.to_string() })?;
        if !response.ok {
            return Err(anyhow!(
                "agent error: {}",
                response.error.as_deref().unwrap_or("unspecified")
            ));
        }
        response.running.ok_or_else(|| anyhow!("agent response missing 'running'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_format_matches_protocol() {
        let check = serde_json::to_value(AgentRequest::Check { name: "nginx".into() }).unwrap();
        assert_eq!(check, serde_json::json!({"cmd": "check", "name": "nginx"}));

        let health = serde_json::to_value(AgentRequest::Health).unwrap();
        assert_eq!(health, serde_json::json!({"cmd": "health"}));
    }

    #[test]
    fn response_wire_format_omits_absent_fields() {
        let ok = serde_json::to_value(AgentResponse::check("nginx", true)).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": true, "process": "nginx", "running": true}));

        let err = serde_json::to_value(AgentResponse::failure("bad cmd")).unwrap();
        assert_eq!(err, serde_json::json!({"ok": false, "error": "bad cmd"}));
    }

    #[test]
    fn responses_parse_back() {
        let parsed: AgentResponse =
            serde_json::from_str(r#"{"ok":true,"process":"redis","running":false}"#).unwrap();
        assert!(parsed.ok);
        assert_eq!(parsed.running, Some(false));
    }
}
