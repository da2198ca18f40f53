//! Monitor configuration.
//!
//! The config directory holds one TOML file per monitored host. Reserved
//! top-level keys describe the host itself (`host`, `name`, `enabled`,
//! `order`, `refresh_rate_sec`); every other top-level table is one probe
//! section whose name must resolve in the plugin registry. Section values
//! are deep-merged over the probe descriptor's defaults, and the host's
//! identity (`host`/`name`) is injected into the merged parameters when the
//! section does not set them itself.
//!
//! Example `db1.toml`:
//!
//! ```toml
//! name = "db1"
//! host = "192.168.1.20"
//! order = 10
//!
//! [ping]
//! every_sec = 2.0
//!
//! [udp]
//! port = 5000
//! aliases = ["db1.local"]
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::core::params::Params;
use crate::core::registry::PluginRegistry;

/// Default tick/render cadence in seconds.
pub const DEFAULT_REFRESH_RATE_SEC: f64 = 0.05;

const RESERVED_KEYS: &[&str] = &["host", "name", "enabled", "order", "refresh_rate_sec"];

/// Fatal configuration errors. These abort startup before any worker runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory not found: {0}")]
    MissingDir(PathBuf),

    #[error("{file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}: invalid TOML: {source}")]
    Parse {
        file: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("{file}: missing 'host' or 'name'")]
    MissingIdentity { file: String },

    #[error("{file}: unknown probe type '{type_name}'")]
    UnknownPlugin { file: String, type_name: String },
}

/// One configured probe instance: (type, host, merged params).
#[derive(Debug, Clone)]
pub struct ElementConfig {
    pub plugin_type: String,
    /// Canonical host key the instance is grouped under.
    pub host_key: String,
    pub params: Params,
    /// Host display order; lower values are shown first.
    pub order: i64,
}

/// Fully loaded monitor configuration.
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    pub refresh_rate_sec: f64,
    pub elements: Vec<ElementConfig>,
}

impl MonitorConfig {
    /// Host display order map derived from the per-file `order` values; a
    /// host configured in several files keeps its lowest order.
    pub fn host_orders(&self) -> std::collections::HashMap<String, i64> {
        let mut orders = std::collections::HashMap::new();
        for el in &self.elements {
            orders
                .entry(el.host_key.clone())
                .and_modify(|o: &mut i64| *o = (*o).min(el.order))
                .or_insert(el.order);
        }
        orders
    }
}

/// Load every `*.toml` file in `dir`, in sorted filename order.
///
/// An unresolvable probe type is fatal: the dashboard must not come up half
/// configured.
pub fn load_config_dir(dir: &Path, registry: &PluginRegistry) -> Result<MonitorConfig, ConfigError> {
    if !dir.is_dir() {
        return Err(ConfigError::MissingDir(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|source| ConfigError::Io { file: dir.display().to_string(), source })?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("toml")))
        .collect();
    files.sort();

    let mut config = MonitorConfig {
        refresh_rate_sec: DEFAULT_REFRESH_RATE_SEC,
        elements: Vec::new(),
    };

    for path in files {
        load_host_file(&path, registry, &mut config)?;
    }

    Ok(config)
}

fn load_host_file(
    path: &Path,
    registry: &PluginRegistry,
    config: &mut MonitorConfig,
) -> Result<(), ConfigError> {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let text = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { file: file.clone(), source })?;
    let table: toml::Table = text
        .parse()
        .map_err(|source| ConfigError::Parse { file: file.clone(), source })?;

    let host = table.get("host").and_then(toml::Value::as_str).map(str::trim).unwrap_or("");
    let name = table.get("name").and_then(toml::Value::as_str).map(str::trim).unwrap_or("");
    let identity = if name.is_empty() { host } else { name };
    if identity.is_empty() {
        return Err(ConfigError::MissingIdentity { file });
    }

    let enabled = table.get("enabled").and_then(toml::Value::as_bool).unwrap_or(true);
    if !enabled {
        debug!(file, "host disabled, skipping");
        return Ok(());
    }

    let order = table.get("order").and_then(toml::Value::as_integer).unwrap_or(1000);

    if let Some(rate) = table.get("refresh_rate_sec") {
        let rate = match rate {
            toml::Value::Float(f) => Some(*f),
            toml::Value::Integer(n) => Some(*n as f64),
            _ => None,
        };
        if let Some(rate) = rate.filter(|r| *r > 0.0) {
            config.refresh_rate_sec = rate;
        }
    }

    for (section, value) in &table {
        if RESERVED_KEYS.contains(&section.as_str()) {
            continue;
        }
        let Some(section_table) = value.as_table() else {
            continue;
        };

        let Some(registered) = registry.resolve(section) else {
            return Err(ConfigError::UnknownPlugin { file, type_name: section.clone() });
        };

        let mut params = Params::merged(&registered.meta.default_params, section_table);
        if !host.is_empty() {
            params.set_default_str("host", host);
        } else {
            params.set_default_str("host", identity);
        }
        params.set_default_str("name", identity);

        config.elements.push(ElementConfig {
            plugin_type: registered.meta.type_name.to_string(),
            host_key: identity.to_string(),
            params,
            order,
        });
    }

    Ok(())
}
