//! Status rows, severities and operator commands.
//!
//! These are the value types exchanged between probe instances and the
//! aggregator/renderer. A `StatusRow` is the latest known status from one
//! source; it is superseded, not merged, by the next write for the same
//! (host, source) key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordinal-free status label attached to a status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Neutral / not yet determined
    Info,
    /// Everything fine
    Ok,
    /// Degraded but alive
    Warn,
    /// Down or failing
    Bad,
}

impl Severity {
    /// Lowercase label as used in logs and config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Bad => "bad",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "ok" => Ok(Self::Ok),
            "warn" => Ok(Self::Warn),
            "bad" => Ok(Self::Bad),
            _ => Err(()),
        }
    }
}

/// Latest known status from one source on one host.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRow {
    /// Canonical host key this row belongs to. May be empty on write; the
    /// aggregator stamps it with the writing probe's host key.
    pub host: String,
    /// Source identifier: probe type plus optional `:` sub-source,
    /// e.g. `"processes:nginx"`.
    pub source: String,
    /// Display text.
    pub text: String,
    /// Status label.
    pub severity: Severity,
    /// Unix timestamp (seconds) of the observation; 0.0 for "never".
    pub ts: f64,
    /// Resolved IP address, if the probe learned one.
    pub ip: Option<String>,
}

impl StatusRow {
    /// Build a row without host/ip; the aggregator fills in the host.
    pub fn new(source: impl Into<String>, text: impl Into<String>, severity: Severity, ts: f64) -> Self {
        Self {
            host: String::new(),
            source: source.into(),
            text: text.into(),
            severity,
            ts,
            ip: None,
        }
    }

    /// Attach a host key.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Attach a resolved IP.
    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    /// The portion of the source identifier before any `:` qualifier,
    /// lowercased (e.g. `processes` from `processes:nginx`).
    pub fn base_type(&self) -> String {
        base_type_of(&self.source)
    }
}

/// Extract the base type from a full source identifier.
pub fn base_type_of(source: &str) -> String {
    let s = source.trim().to_ascii_lowercase();
    if s.is_empty() {
        return "?".to_string();
    }
    s.split(':').next().unwrap_or("?").to_string()
}

/// An operator-invokable command declared by a probe instance.
///
/// `key` is the token the operator types; within one host's active command
/// set a later registration under the same key overwrites an earlier one.
/// The aggregator injects the owning probe's type into `payload["plugin"]`
/// so dispatch can route the command back to its executor.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Operator-typed token.
    pub key: String,
    /// Display text for the command menu.
    pub label: String,
    /// Opaque payload interpreted by the owning probe.
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl CommandSpec {
    /// Create a command with an empty payload.
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self { key: key.into(), label: label.into(), payload: serde_json::Map::new() }
    }

    /// Add a payload entry.
    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Payload entry as a string, if present and non-empty.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Current unix time in fractional seconds.
pub fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_round_trips_through_str() {
        for sev in [Severity::Info, Severity::Ok, Severity::Warn, Severity::Bad] {
            assert_eq!(sev.as_str().parse::<Severity>().unwrap(), sev);
        }
        assert!("critical".parse::<Severity>().is_err());
    }

    #[test]
    fn base_type_strips_sub_source() {
        assert_eq!(base_type_of("processes:nginx"), "processes");
        assert_eq!(base_type_of("PING"), "ping");
        assert_eq!(base_type_of(""), "?");
        assert_eq!(base_type_of("udp"), "udp");
    }

    #[test]
    fn command_payload_accessor_ignores_blank_values() {
        let cmd = CommandSpec::new("r", "restart")
            .with_payload("command", "systemctl restart nginx")
            .with_payload("empty", "  ");
        assert_eq!(cmd.payload_str("command"), Some("systemctl restart nginx"));
        assert_eq!(cmd.payload_str("empty"), None);
        assert_eq!(cmd.payload_str("missing"), None);
    }
}
