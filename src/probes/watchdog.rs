//! Self-healing watchdog.
//!
//! Watches another probe's severity through the aggregator cache and runs a
//! configured shell command when the severity transitions into a watched set.
//! The trigger logic lives in [`WatchdogMachine`], a plain state machine with
//! an injected clock, so every transition rule is testable without threads.
//!
//! The machine is observational: it reacts to severity transitions, never to
//! a steady state. A severity that stays bad after a remediation attempt does
//! not re-trigger until it changes away and back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;

use crate::core::{now_ts, Params, Plugin, PluginBase, PluginContext, PluginMeta, Severity};
use crate::params_table;
use crate::probes::exec::run_shell;
use crate::probes::worker::ProbeWorker;

pub const TYPE_NAME: &str = "watchdog";

pub fn meta() -> PluginMeta {
    PluginMeta {
        type_name: TYPE_NAME,
        default_params: params_table! {
            "service_name" => "WATCHDOG",
            "watch_source" => "",
            "watch_when" => toml::Value::Array(vec![toml::Value::String("bad".to_string())]),
            "rescue_command" => "",
            "recheck_after_sec" => 10.0,
            "cooldown_sec" => 60.0,
            "run_on_first" => false,
            "poll_every_sec" => 0.25,
        },
        expose_status: false,
        show_in_table: false,
    }
}

pub fn create(ctx: &PluginContext, host_key: &str, params: Params) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(WatchdogProbe::new(ctx, host_key, &params)))
}

/// What one observation asks the caller to do.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogStep {
    /// Nothing to do.
    Idle,
    /// Severity changed; the caller should log `prev -> cur`.
    Transition {
        prev: Severity,
        cur: Severity,
        /// Whether the transition armed a trigger (entered the watched set
        /// while neither running nor cooling down).
        trigger: bool,
    },
    /// First observation with `run_on_first` and a watched severity.
    TriggerOnFirst(Severity),
}

/// Trigger/cooldown state machine.
///
/// Pure transition logic: `observe` consumes a clock value and the current
/// watched severity and returns what should happen. The owner is responsible
/// for actually running the remediation and for calling `finish` afterwards.
pub struct WatchdogMachine {
    watch_when: Vec<Severity>,
    cooldown_sec: f64,
    run_on_first: bool,
    last_seen: Option<Severity>,
    cooldown_until: f64,
    running: bool,
}

impl WatchdogMachine {
    pub fn new(watch_when: Vec<Severity>, cooldown_sec: f64, run_on_first: bool) -> Self {
        Self {
            watch_when,
            cooldown_sec: cooldown_sec.max(0.0),
            run_on_first,
            last_seen: None,
            cooldown_until: 0.0,
            running: false,
        }
    }

    fn watched(&self, severity: Severity) -> bool {
        self.watch_when.contains(&severity)
    }

    /// Gate a trigger attempt: refused while an action runs or cooldown
    /// holds. On success the machine is marked running.
    fn try_arm(&mut self, now: f64) -> bool {
        if self.running || now < self.cooldown_until {
            return false;
        }
        self.running = true;
        true
    }

    /// Feed one severity observation at time `now`.
    pub fn observe(&mut self, now: f64, severity: Severity) -> WatchdogStep {
        let Some(prev) = self.last_seen else {
            self.last_seen = Some(severity);
            if self.run_on_first && self.watched(severity) && self.try_arm(now) {
                return WatchdogStep::TriggerOnFirst(severity);
            }
            return WatchdogStep::Idle;
        };

        if prev == severity {
            return WatchdogStep::Idle;
        }

        self.last_seen = Some(severity);
        let trigger = self.watched(severity) && self.try_arm(now);
        WatchdogStep::Transition { prev, cur: severity, trigger }
    }

    /// Close out a remediation attempt: start the cooldown window and clear
    /// the running mark. Called unconditionally, success or failure.
    pub fn finish(&mut self, now: f64) {
        self.cooldown_until = now + self.cooldown_sec;
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

fn parse_watch_when(params: &Params) -> Vec<Severity> {
    let listed: Vec<Severity> = params
        .get_str_list("watch_when")
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    if listed.is_empty() {
        vec![Severity::Bad]
    } else {
        listed
    }
}

pub struct WatchdogProbe {
    base: Arc<PluginBase>,
    machine: Arc<Mutex<WatchdogMachine>>,
    service: String,
    watch_source: Option<String>,
    rescue_command: Option<String>,
    recheck_after_sec: f64,
    poll_every_sec: f64,
    worker: ProbeWorker,
}

impl WatchdogProbe {
    fn new(ctx: &PluginContext, host_key: &str, params: &Params) -> Self {
        let base = PluginBase::new(Arc::clone(&ctx.aggregator), TYPE_NAME, host_key);
        let machine = WatchdogMachine::new(
            parse_watch_when(params),
            params.get_f64("cooldown_sec", 60.0),
            params.get_bool("run_on_first", false),
        );
        Self {
            base,
            machine: Arc::new(Mutex::new(machine)),
            service: params
                .get_str("service_name")
                .unwrap_or_else(|| "WATCHDOG".to_string())
                .to_uppercase(),
            watch_source: params.get_str("watch_source").map(|s| s.to_ascii_lowercase()),
            rescue_command: params.get_str("rescue_command"),
            recheck_after_sec: params.get_f64("recheck_after_sec", 10.0).max(0.0),
            poll_every_sec: params.get_f64("poll_every_sec", 0.25),
            worker: ProbeWorker::new(),
        }
    }
}

impl Plugin for WatchdogProbe {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn host_key(&self) -> &str {
        self.base.host_key()
    }

    fn start(&self) -> Result<()> {
        let (Some(source), Some(_)) = (&self.watch_source, &self.rescue_command) else {
            self.base.write_log(&format!(
                "{}: disabled, watch_source or rescue_command missing",
                self.service
            ));
            return Ok(());
        };

        let base = Arc::clone(&self.base);
        let machine = Arc::clone(&self.machine);
        let service = self.service.clone();
        let source = source.clone();
        let launcher = RescueLauncher {
            base: Arc::clone(&self.base),
            machine: Arc::clone(&self.machine),
            service: self.service.clone(),
            watch_source: source.clone(),
            rescue_command: self.rescue_command.clone().unwrap_or_default(),
            recheck_after_sec: self.recheck_after_sec,
        };

        // The poll loop only observes; rescues run detached so a slow
        // command never stalls observation.
        self.worker.spawn_interval(self.poll_every_sec, move || {
            let Some(severity) = base.aggregator().get_last_severity(base.host_key(), &source)
            else {
                return;
            };
            let step = machine.lock().observe(now_ts(), severity);
            match step {
                WatchdogStep::Idle => {}
                WatchdogStep::Transition { prev, cur, trigger } => {
                    base.write_log(&format!("{service}: [{source}] {prev} -> {cur}"));
                    if trigger {
                        launcher.spawn_action(cur);
                    }
                }
                WatchdogStep::TriggerOnFirst(sev) => {
                    base.write_log(&format!("{service}: [{source}] starts {sev}"));
                    launcher.spawn_action(sev);
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

/// Owned copy of everything the poll closure needs to launch a rescue.
struct RescueLauncher {
    base: Arc<PluginBase>,
    machine: Arc<Mutex<WatchdogMachine>>,
    service: String,
    watch_source: String,
    rescue_command: String,
    recheck_after_sec: f64,
}

impl RescueLauncher {
    fn spawn_action(&self, severity: Severity) {
        let machine = Arc::clone(&self.machine);
        let base = Arc::clone(&self.base);
        let service = self.service.clone();
        let source = self.watch_source.clone();
        let command = self.rescue_command.clone();
        let recheck = self.recheck_after_sec;

        std::thread::spawn(move || {
            base.write_log(&format!("{service}: [{source}] {severity}, running rescue"));
            match run_shell(&command, Duration::from_secs(300)) {
                Ok(output) => {
                    let rc = output.code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                    base.write_log(&format!("{service}: rescue exited rc={rc}"));
                    for line in output.combined().lines().filter(|l| !l.trim().is_empty()) {
                        base.write_log(line);
                    }
                }
                Err(err) => base.write_log(&format!("{service}: rescue failed: {err:#}")),
            }

            std::thread::sleep(Duration::from_secs_f64(recheck));
            let after = base.aggregator().get_last_severity(base.host_key(), &source);
            match after {
                Some(sev) => base.write_log(&format!("{service}: [{source}] now {sev}")),
                None => base.write_log(&format!("{service}: [{source}] no status after rescue")),
            }

            machine.lock().finish(now_ts());
        });
    }
}
