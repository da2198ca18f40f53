//! Remote command execution over ssh.
//!
//! Contributes no table row; it only registers the operator commands listed
//! in its configuration. Each invocation runs non-interactively (BatchMode,
//! bounded connect and run time) on a detached thread and streams the result
//! into the operator log. Log output is always on for this plugin since the
//! log is its only surface.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::core::{CommandSpec, Params, Plugin, PluginBase, PluginContext, PluginMeta};
use crate::params_table;
use crate::probes::exec::run_command;

pub const TYPE_NAME: &str = "ssh";

pub fn meta() -> PluginMeta {
    PluginMeta {
        type_name: TYPE_NAME,
        default_params: params_table! {
            "port" => 22,
            "user" => "",
            "timeout_sec" => 15.0,
            "commands" => toml::Value::Array(Vec::new()),
            "extra_args" => toml::Value::Array(Vec::new()),
        },
        expose_status: false,
        show_in_table: false,
    }
}

pub fn create(ctx: &PluginContext, host_key: &str, params: Params) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(SshExecutor::new(ctx, host_key, &params)))
}

/// One configured remote command.
#[derive(Debug, Clone)]
struct RemoteCommand {
    key: String,
    label: String,
    command: String,
}

/// Pull `{ key, label, command }` tables out of the `commands` array.
/// Entries missing a key or command are skipped.
fn parse_commands(params: &Params) -> Vec<RemoteCommand> {
    let Some(toml::Value::Array(entries)) = params.get("commands") else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let table = entry.as_table()?;
            let key = table.get("key")?.as_str()?.trim().to_string();
            let command = table.get("command")?.as_str()?.trim().to_string();
            if key.is_empty() || command.is_empty() {
                return None;
            }
            let label = table
                .get("label")
                .and_then(toml::Value::as_str)
                .map_or_else(|| key.clone(), ToString::to_string);
            Some(RemoteCommand { key, label, command })
        })
        .collect()
}

pub struct SshExecutor {
    base: Arc<PluginBase>,
    target: String,
    port: u16,
    user: Option<String>,
    extra_args: Vec<String>,
    timeout: Duration,
    commands: Vec<RemoteCommand>,
}

impl SshExecutor {
    fn new(ctx: &PluginContext, host_key: &str, params: &Params) -> Self {
        let base = PluginBase::new(Arc::clone(&ctx.aggregator), TYPE_NAME, host_key);
        let target = params.get_str("host").unwrap_or_else(|| base.host_key().to_string());
        Self {
            base,
            target,
            port: u16::try_from(params.get_i64("port", 22)).unwrap_or(22),
            user: params.get_str("user").filter(|u| !u.trim().is_empty()),
            extra_args: params.get_str_list("extra_args"),
            timeout: Duration::from_secs_f64(params.get_f64("timeout_sec", 15.0).max(1.0)),
            commands: parse_commands(params),
        }
    }

    fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        let connect_secs = self.timeout.as_secs().max(1);
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={connect_secs}"),
        ];
        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        let destination = match &self.user {
            Some(user) => format!("{user}@{}", self.target),
            None => self.target.clone(),
        };
        args.push(destination);
        args.push(remote_command.to_string());
        args
    }
}

impl Plugin for SshExecutor {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn host_key(&self) -> &str {
        self.base.host_key()
    }

    fn commands(&self) -> Vec<CommandSpec> {
        self.commands
            .iter()
            .map(|rc| {
                CommandSpec::new(&rc.key, &rc.label)
                    .with_payload("command", rc.command.as_str())
                    .with_payload("label", rc.label.as_str())
            })
            .collect()
    }

    fn exec_command(&self, cmd: &CommandSpec) -> Result<()> {
        let Some(command) = cmd.payload_str("command").map(ToString::to_string) else {
            return Ok(());
        };
        let label = cmd.payload_str("label").unwrap_or(&cmd.key).to_string();

        let base = Arc::clone(&self.base);
        let args = self.ssh_args(&command);
        // Slack over the ssh-side ConnectTimeout so the transport error,
        // not our kill, is what gets reported.
        let timeout = self.timeout + Duration::from_secs(2);
        std::thread::spawn(move || {
            base.write_log(&format!("{label} -> {command}"));
            match run_command("ssh", &args, timeout) {
                Ok(output) => {
                    for line in output.combined().lines().filter(|l| !l.trim().is_empty()) {
                        base.write_log(line);
                    }
                    if output.success() {
                        base.write_log(&format!("{label} OK"));
                    } else {
                        match output.code {
                            Some(rc) => base.write_log(&format!("{label} FAIL({rc})")),
                            None => base.write_log(&format!("{label} FAIL")),
                        }
                    }
                }
                Err(err) => base.write_log(&format!("{label} FAIL: {err:#}")),
            }
        });
        Ok(())
    }

    // The log is this plugin's only output; it cannot be muted.
    fn set_log_messages(&self, _enable: bool) {}

    fn log_messages(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Aggregator;
    use crate::net::mux::EndpointMux;
    use std::collections::HashMap;

    fn ctx() -> PluginContext {
        PluginContext {
            aggregator: Aggregator::new(HashMap::new()),
            mux: EndpointMux::new(),
        }
    }

    fn executor(params: toml::Table) -> SshExecutor {
        SshExecutor::new(&ctx(), "db1", &Params::merged(&meta().default_params, &params))
    }

    #[test]
    fn parses_configured_commands_and_payloads() {
        let params = params_table! {
            "commands" => toml::Value::Array(vec![
                toml::Value::Table(params_table! {
                    "key" => "r",
                    "label" => "restart nginx",
                    "command" => "sudo systemctl restart nginx",
                }),
                // No command, dropped.
                toml::Value::Table(params_table! { "key" => "x" }),
            ]),
        };
        let exec = executor(params);
        let cmds = exec.commands();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].key, "r");
        assert_eq!(cmds[0].label, "restart nginx");
        assert_eq!(cmds[0].payload_str("command"), Some("sudo systemctl restart nginx"));
        assert_eq!(cmds[0].payload_str("label"), Some("restart nginx"));
    }

    #[test]
    fn ssh_args_include_batch_options_and_destination() {
        let exec = executor(params_table! { "user" => "ops", "port" => 2222 });
        let args = exec.ssh_args("uptime");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "2222");
        assert_eq!(args[args.len() - 2], "ops@db1");
        assert_eq!(args[args.len() - 1], "uptime");
    }

    #[test]
    fn default_port_omits_port_flag() {
        let exec = executor(toml::Table::new());
        let args = exec.ssh_args("true");
        assert!(!args.contains(&"-p".to_string()));
        assert_eq!(args[args.len() - 2], "db1");
    }
}
