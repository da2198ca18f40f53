//! Probe plugin contract.
//!
//! Every probe implements [`Plugin`]; all hooks beyond identity are optional
//! and default to no-ops, so concrete probes override only what they need.
//! Construction goes through a [`PluginFactory`] that receives the shared
//! application context, the canonical host key and the merged parameters.
//!
//! Hook contract:
//! - `start` is invoked exactly once after registration; it may spawn
//!   background workers but must not block the caller.
//! - `stop` is idempotent, terminates any workers the instance started and
//!   releases any multiplexer subscription.
//! - `tick` runs on the foreground thread once per refresh cycle and must be
//!   cheap and non-blocking.
//! - Errors from `start`/`stop`/`tick`/`exec_command` are caught at the call
//!   site and logged with the instance identity; they never propagate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::core::aggregator::Aggregator;
use crate::core::params::Params;
use crate::core::status::{CommandSpec, StatusRow};
use crate::net::mux::EndpointMux;

/// Immutable probe type descriptor, registered once at startup.
#[derive(Debug, Clone)]
pub struct PluginMeta {
    /// Probe type name (registry key, matched case-insensitively).
    pub type_name: &'static str,
    /// Default parameters merged under host-level config sections.
    pub default_params: toml::Table,
    /// Whether the probe publishes status rows at all.
    pub expose_status: bool,
    /// Whether the probe's rows appear in the host table. Suppressed rows
    /// still feed the aggregator's severity cache.
    pub show_in_table: bool,
}

/// Shared services handed to probe factories.
///
/// The multiplexer is an explicit member here rather than a process global so
/// tests can construct isolated instances without cross-test interference.
pub struct PluginContext {
    pub aggregator: Arc<Aggregator>,
    pub mux: Arc<EndpointMux>,
}

/// Factory signature: `(context, host key, merged params) -> instance`.
pub type PluginFactory = fn(&PluginContext, &str, Params) -> Result<Arc<dyn Plugin>>;

/// Capability contract implemented by every probe instance.
pub trait Plugin: Send + Sync {
    /// Probe type name (lowercase registry key).
    fn type_name(&self) -> &str;

    /// Canonical host key this instance monitors.
    fn host_key(&self) -> &str;

    /// Called exactly once after registration. Must not block.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Idempotent shutdown; joins workers, releases subscriptions.
    fn stop(&self) {}

    /// Foreground refresh hook; must be cheap and non-blocking.
    fn tick(&self) -> Result<()> {
        Ok(())
    }

    /// Operator commands this instance wants in its host's command set.
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Execute one of this instance's declared commands.
    fn exec_command(&self, _cmd: &CommandSpec) -> Result<()> {
        Ok(())
    }

    /// Enable/disable forwarding of raw probe traffic into the operator log.
    fn set_log_messages(&self, _enable: bool) {}

    /// Whether raw-traffic logging is currently enabled.
    fn log_messages(&self) -> bool {
        false
    }
}

/// Shared per-instance state and helpers used by the builtin probes.
///
/// Holds the aggregator handle, the identity used for log prefixes and row
/// stamping, and the raw-message log flag. Probes keep this in an `Arc` so
/// worker threads can write status and log lines without owning the plugin.
pub struct PluginBase {
    aggregator: Arc<Aggregator>,
    type_name: &'static str,
    host_key: String,
    log_messages: AtomicBool,
}

impl PluginBase {
    pub fn new(aggregator: Arc<Aggregator>, type_name: &'static str, host_key: &str) -> Arc<Self> {
        let key = host_key.trim();
        Arc::new(Self {
            aggregator,
            type_name,
            host_key: if key.is_empty() { "?".to_string() } else { key.to_string() },
            log_messages: AtomicBool::new(false),
        })
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn host_key(&self) -> &str {
        &self.host_key
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Operator log line prefixed with `[type] host:`.
    pub fn write_log(&self, text: &str) {
        self.aggregator.write_log(&format!("[{}] {}: {}", self.type_name, self.host_key, text));
    }

    /// Publish a status row under this instance's host key.
    pub fn write_status(&self, row: StatusRow) {
        self.aggregator.write_status(&self.host_key, row);
    }

    pub fn set_log_messages(&self, enable: bool) {
        self.log_messages.store(enable, Ordering::Relaxed);
    }

    pub fn log_messages(&self) -> bool {
        self.log_messages.load(Ordering::Relaxed)
    }
}
