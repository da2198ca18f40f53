//! Remote process probe.
//!
//! Asks the companion agent (`hostwatch-agent`) whether the configured
//! processes are running, one UDP request per process per cycle. Each
//! process gets its own sub-source row (`processes:<name>`); with
//! `show_all = false` only failing processes are re-reported after the
//! initial sample.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use crate::core::{
    now_ts, Params, Plugin, PluginBase, PluginContext, PluginMeta, Severity, StatusRow,
};
use crate::net::agent::{AgentClient, DEFAULT_AGENT_PORT};
use crate::params_table;
use crate::probes::worker::ProbeWorker;

pub const TYPE_NAME: &str = "processes";

pub fn meta() -> PluginMeta {
    PluginMeta {
        type_name: TYPE_NAME,
        default_params: params_table! {
            "port" => i64::from(DEFAULT_AGENT_PORT),
            "prog" => toml::Value::Array(Vec::new()),
            "every_sec" => 5.0,
            "timeout_sec" => 1.0,
            "show_all" => true,
        },
        expose_status: true,
        show_in_table: true,
    }
}

pub fn create(ctx: &PluginContext, host_key: &str, params: Params) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(ProcessesProbe::new(ctx, host_key, &params)))
}

/// Result of one per-process check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcState {
    Running,
    Stopped,
    /// Agent unreachable or protocol error.
    Unknown,
}

fn row_for(agent_host: &str, now: f64, name: &str, state: ProcState) -> StatusRow {
    let (label, severity) = match state {
        ProcState::Running => ("OK", Severity::Ok),
        ProcState::Stopped => ("OFFLINE", Severity::Bad),
        ProcState::Unknown => ("ERR", Severity::Bad),
    };
    StatusRow::new(format!("{TYPE_NAME}:{name}"), format!("PROC: {name}={label}"), severity, now)
        .with_ip(Some(agent_host.to_string()))
}

pub struct ProcessesProbe {
    base: Arc<PluginBase>,
    client: AgentClient,
    agent_host: String,
    programs: Vec<String>,
    every_sec: f64,
    show_all: bool,
    worker: ProbeWorker,
}

impl ProcessesProbe {
    fn new(ctx: &PluginContext, host_key: &str, params: &Params) -> Self {
        let base = PluginBase::new(Arc::clone(&ctx.aggregator), TYPE_NAME, host_key);
        let agent_host = params.get_str("host").unwrap_or_else(|| base.host_key().to_string());
        let port = u16::try_from(params.get_i64("port", i64::from(DEFAULT_AGENT_PORT)))
            .unwrap_or(DEFAULT_AGENT_PORT);
        let timeout = Duration::from_secs_f64(params.get_f64("timeout_sec", 1.0).max(0.1));

        Self {
            base,
            client: AgentClient::new(&agent_host, port, timeout),
            agent_host,
            programs: params.get_str_list("prog"),
            every_sec: params.get_f64("every_sec", 5.0),
            show_all: params.get_bool("show_all", true),
            worker: ProbeWorker::new(),
        }
    }
}

impl Plugin for ProcessesProbe {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn host_key(&self) -> &str {
        self.base.host_key()
    }

    fn start(&self) -> Result<()> {
        let now = now_ts();
        if self.programs.is_empty() {
            self.base.write_status(
                StatusRow::new(TYPE_NAME, "PROC: -", Severity::Info, now)
                    .with_ip(Some(self.agent_host.clone())),
            );
            return Ok(());
        }
        for name in &self.programs {
            self.base.write_status(
                StatusRow::new(
                    format!("{TYPE_NAME}:{name}"),
                    format!("PROC: {name}=..."),
                    Severity::Info,
                    now,
                )
                .with_ip(Some(self.agent_host.clone())),
            );
        }

        let base = Arc::clone(&self.base);
        let client = self.client.clone();
        let agent_host = self.agent_host.clone();
        let programs = self.programs.clone();
        let show_all = self.show_all;
        let sent_initial = AtomicBool::new(false);

        self.worker.spawn_interval(self.every_sec, move || {
            let now = now_ts();
            let results: Vec<(String, ProcState)> = programs
                .iter()
                .map(|name| {
                    let state = match client.check_process(name) {
                        Ok(true) => ProcState::Running,
                        Ok(false) => ProcState::Stopped,
                        Err(err) => {
                            debug!(host = %agent_host, process = %name, %err, "agent check failed");
                            ProcState::Unknown
                        }
                    };
                    (name.clone(), state)
                })
                .collect();

            let initial = !sent_initial.swap(true, Ordering::Relaxed);
            for (name, state) in &results {
                if show_all || initial || *state != ProcState::Running {
                    base.write_status(row_for(&agent_host, now, name, *state));
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        self.worker.stop();
    }

    fn set_log_messages(&self, enable: bool) {
        self.base.set_log_messages(enable);
    }

    fn log_messages(&self) -> bool {
        self.base.log_messages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_carry_sub_source_and_severity() {
        let ok = row_for("10.0.0.5", 1.0, "nginx", ProcState::Running);
        assert_eq!(ok.source, "processes:nginx");
        assert_eq!(ok.severity, Severity::Ok);
        assert_eq!(ok.text, "PROC: nginx=OK");
        assert_eq!(ok.ip.as_deref(), Some("10.0.0.5"));

        assert_eq!(row_for("h", 1.0, "redis", ProcState::Stopped).severity, Severity::Bad);
        assert_eq!(row_for("h", 1.0, "redis", ProcState::Unknown).text, "PROC: redis=ERR");
    }
}
