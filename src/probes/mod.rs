//! Builtin probe implementations.

pub mod exec;
pub mod heartbeat;
pub mod http;
pub mod ping;
pub mod processes;
pub mod ssh;
pub mod watchdog;
pub mod worker;

use crate::core::PluginRegistry;

/// Register every builtin probe type.
pub fn register_builtins(registry: &mut PluginRegistry) {
    registry.register(ping::meta(), ping::create);
    registry.register(http::meta(), http::create);
    registry.register(processes::meta(), processes::create);
    registry.register(ssh::meta(), ssh::create);
    registry.register(heartbeat::meta(), heartbeat::create);
    registry.register(watchdog::meta(), watchdog::create);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_register_with_expected_display_flags() {
        let mut registry = PluginRegistry::new();
        register_builtins(&mut registry);

        assert_eq!(
            registry.type_names(),
            vec!["http", "ping", "processes", "ssh", "udp", "watchdog"]
        );

        let flags = registry.display_flags();
        assert_eq!(flags.get("ping"), Some(&true));
        assert_eq!(flags.get("ssh"), Some(&false));
        assert_eq!(flags.get("watchdog"), Some(&false));
        assert_eq!(flags.get("udp"), Some(&true));
    }
}
