//! Application assembly.
//!
//! Builds the registry, loads the config directory, constructs one probe
//! instance per configured element and drives their lifecycle around the
//! dashboard loop. Configuration problems are fatal here; anything a running
//! probe throws later is logged and contained.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::core::{load_config_dir, Aggregator, Plugin, PluginContext, PluginRegistry};
use crate::net::mux::EndpointMux;
use crate::probes::register_builtins;

/// A fully constructed monitor: aggregator, multiplexer and probe instances.
pub struct App {
    aggregator: Arc<Aggregator>,
    #[allow(dead_code)]
    mux: Arc<EndpointMux>,
    plugins: Vec<Arc<dyn Plugin>>,
    refresh_rate_sec: f64,
}

impl App {
    /// Build the monitor from a config directory. Any configuration error is
    /// fatal; no worker has started yet when this returns `Err`.
    pub fn build(config_dir: &Path) -> Result<Self> {
        let mut registry = PluginRegistry::new();
        register_builtins(&mut registry);

        let config = load_config_dir(config_dir, &registry)
            .with_context(|| format!("loading config from {}", config_dir.display()))?;

        let aggregator = Aggregator::new(registry.display_flags());
        let mux = EndpointMux::new();
        let ctx = PluginContext { aggregator: Arc::clone(&aggregator), mux: Arc::clone(&mux) };

        let mut plugins: Vec<Arc<dyn Plugin>> = Vec::with_capacity(config.elements.len());
        for element in &config.elements {
            let registered = registry
                .resolve(&element.plugin_type)
                .with_context(|| format!("unregistered probe type {}", element.plugin_type))?;
            let plugin = (registered.factory)(&ctx, &element.host_key, element.params.clone())
                .with_context(|| {
                    format!("building {} for {}", element.plugin_type, element.host_key)
                })?;
            aggregator.ensure_host(&element.host_key);
            aggregator.register_plugin(Arc::clone(&plugin));
            plugins.push(plugin);
        }

        aggregator.apply_host_order(&config.host_orders());
        info!(hosts = config.host_orders().len(), probes = plugins.len(), "monitor built");

        Ok(Self { aggregator, mux, plugins, refresh_rate_sec: config.refresh_rate_sec })
    }

    /// Start every probe. Individual start failures are logged and leave the
    /// rest of the dashboard running.
    pub fn start(&self) {
        for plugin in &self.plugins {
            if let Err(err) = plugin.start() {
                warn!(probe = plugin.type_name(), host = plugin.host_key(), %err, "probe start failed");
                self.aggregator.write_log(&format!(
                    "[{}] {}: start failed: {err:#}",
                    plugin.type_name(),
                    plugin.host_key()
                ));
            }
        }
    }

    /// Foreground refresh hook, called once per render cycle.
    pub fn tick(&self) {
        for plugin in &self.plugins {
            if let Err(err) = plugin.tick() {
                self.aggregator.write_log(&format!(
                    "[{}] {}: tick failed: {err:#}",
                    plugin.type_name(),
                    plugin.host_key()
                ));
            }
        }
    }

    /// Stop every probe; joins workers, so the call returns only after all
    /// background threads have exited.
    pub fn stop(&self) {
        for plugin in &self.plugins {
            plugin.stop();
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs_f64(self.refresh_rate_sec.max(0.01))
    }

    pub fn probe_count(&self) -> usize {
        self.plugins.len()
    }
}
