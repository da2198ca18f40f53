//! Core types and functionality for hostwatch.
//!
//! This module contains the fundamental data structures of the dashboard:
//! status rows and commands, the probe contract and registry, the central
//! state aggregator and the configuration loader.

mod aggregator;
mod config;
mod params;
mod plugin;
mod registry;
mod status;

pub use aggregator::{Aggregator, DashboardSnapshot, HostView, DEFAULT_LOG_CAPACITY};
pub use config::{
    load_config_dir, ConfigError, ElementConfig, MonitorConfig, DEFAULT_REFRESH_RATE_SEC,
};
pub use params::Params;
pub use plugin::{Plugin, PluginBase, PluginContext, PluginFactory, PluginMeta};
pub use registry::{PluginRegistry, RegisteredPlugin};
pub use status::{base_type_of, now_ts, CommandSpec, Severity, StatusRow};
