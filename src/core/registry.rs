//! Probe type registry.
//!
//! Maps a probe type name to its descriptor and factory. Populated once at
//! startup from the builtin probe set; read-only afterward. Lookup is
//! case-insensitive; failing to resolve a configured type at build time is a
//! fatal configuration error.

use std::collections::HashMap;

use crate::core::plugin::{PluginFactory, PluginMeta};

/// One registered probe type.
pub struct RegisteredPlugin {
    pub meta: PluginMeta,
    pub factory: PluginFactory,
}

/// Registry of probe types, keyed by lowercase type name.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, RegisteredPlugin>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").field("types", &self.type_names()).finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a probe type. A later registration under the same name
    /// replaces the earlier one.
    pub fn register(&mut self, meta: PluginMeta, factory: PluginFactory) {
        let key = meta.type_name.trim().to_ascii_lowercase();
        if key.is_empty() {
            return;
        }
        self.plugins.insert(key, RegisteredPlugin { meta, factory });
    }

    /// Case-insensitive lookup by type name.
    pub fn resolve(&self, type_name: &str) -> Option<&RegisteredPlugin> {
        self.plugins.get(&type_name.trim().to_ascii_lowercase())
    }

    /// Sorted list of registered type names.
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    /// `show_in_table` per type, consumed by the aggregator to decide which
    /// rows reach the visible host table.
    pub fn display_flags(&self) -> HashMap<String, bool> {
        self.plugins
            .iter()
            .map(|(key, reg)| (key.clone(), reg.meta.show_in_table))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plugin::{Plugin, PluginContext};
    use crate::core::params::Params;
    use crate::params_table;
    use std::sync::Arc;

    fn meta(name: &'static str, show_in_table: bool) -> PluginMeta {
        PluginMeta {
            type_name: name,
            default_params: params_table! {},
            expose_status: true,
            show_in_table,
        }
    }

    fn dummy_factory(
        _ctx: &PluginContext,
        _host: &str,
        _params: Params,
    ) -> anyhow::Result<Arc<dyn Plugin>> {
        anyhow::bail!("not constructible in tests")
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let mut reg = PluginRegistry::new();
        reg.register(meta("ping", true), dummy_factory);
        assert!(reg.resolve("PING").is_some());
        assert!(reg.resolve("  ping ").is_some());
        assert!(reg.resolve("pong").is_none());
    }

    #[test]
    fn display_flags_reflect_descriptors() {
        let mut reg = PluginRegistry::new();
        reg.register(meta("ping", true), dummy_factory);
        reg.register(meta("ssh", false), dummy_factory);
        let flags = reg.display_flags();
        assert_eq!(flags.get("ping"), Some(&true));
        assert_eq!(flags.get("ssh"), Some(&false));
    }
}
