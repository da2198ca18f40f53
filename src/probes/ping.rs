//! ICMP reachability probe built on the system `ping` binary.
//!
//! One ping per cycle; a row is written only for the initial sample and on
//! online/offline flips, so a stable host does not churn the table. The `t`
//! command runs a bounded traceroute into the operator log.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::core::{
    now_ts, CommandSpec, Params, Plugin, PluginBase, PluginContext, PluginMeta, Severity,
    StatusRow,
};
use crate::params_table;
use crate::probes::exec::run_command;
use crate::probes::worker::ProbeWorker;

pub const TYPE_NAME: &str = "ping";

const TRACE_TIMEOUT: Duration = Duration::from_secs(60);

pub fn meta() -> PluginMeta {
    PluginMeta {
        type_name: TYPE_NAME,
        default_params: params_table! {
            "every_sec" => 5.0,
            "timeout_ms" => 2000,
        },
        expose_status: true,
        show_in_table: true,
    }
}

pub fn create(ctx: &PluginContext, host_key: &str, params: Params) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(PingProbe::new(ctx, host_key, &params)))
}

static IPV4_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})\b").expect("static regex")
});
static LATENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)").expect("static regex"));

/// One-shot pinger, independent of the plugin plumbing.
#[derive(Debug, Clone)]
struct Pinger {
    target: String,
    timeout: Duration,
}

impl Pinger {
    fn new(target: String, timeout_ms: u64) -> Self {
        Self { target, timeout: Duration::from_millis(timeout_ms.max(100)) }
    }

    /// `(resolved ip, round-trip ms)`; latency `None` means unreachable.
    fn ping_once(&self) -> (Option<String>, Option<u64>) {
        let wait_secs = self.timeout.as_secs_f64().ceil().max(1.0) as u64;
        let args = vec![
            "-c".to_string(),
            "1".to_string(),
            "-W".to_string(),
            wait_secs.to_string(),
            self.target.clone(),
        ];

        let output = match run_command("ping", &args, self.timeout + Duration::from_secs(2)) {
            Ok(out) => out,
            Err(err) => {
                debug!(target = %self.target, %err, "ping spawn failed");
                return (None, None);
            }
        };

        let text = format!("{}\n{}", output.stdout, output.stderr);
        let ip = extract_ip(&text);
        let latency = if output.success() { extract_latency_ms(&text) } else { None };
        (ip, latency)
    }
}

/// First plausible IPv4 literal in the ping output.
fn extract_ip(output: &str) -> Option<String> {
    IPV4_RE
        .find_iter(output)
        .map(|m| m.as_str())
        .find(|candidate| candidate.split('.').all(|octet| octet.parse::<u8>().is_ok()))
        .map(ToString::to_string)
}

/// Round-trip time in whole milliseconds, from a `time=1.93 ms` token.
fn extract_latency_ms(output: &str) -> Option<u64> {
    let value: f64 = LATENCY_RE.captures(output)?.get(1)?.as_str().parse().ok()?;
    Some(value.round() as u64)
}

/// Bounded traceroute output, reduced to hop lines for the operator log.
fn format_trace_output(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| line.split_whitespace().next().is_some_and(|tok| tok.chars().all(|c| c.is_ascii_digit())))
        .map(|line| {
            let mut parts = line.split_whitespace();
            let hop = parts.next().unwrap_or("?");
            format!("{hop:>2}  {}", parts.collect::<Vec<_>>().join(" "))
        })
        .collect()
}

pub struct PingProbe {
    base: Arc<PluginBase>,
    pinger: Pinger,
    every_sec: f64,
    worker: ProbeWorker,
}

impl PingProbe {
    fn new(ctx: &PluginContext, host_key: &str, params: &Params) -> Self {
        let base = PluginBase::new(Arc::clone(&ctx.aggregator), TYPE_NAME, host_key);
        let target = params.get_str("host").unwrap_or_else(|| base.host_key().to_string());
        let timeout_ms = params.get_i64("timeout_ms", 2000).max(0) as u64;
        Self {
            base,
            pinger: Pinger::new(target, timeout_ms),
            every_sec: params.get_f64("every_sec", 5.0),
            worker: ProbeWorker::new(),
        }
    }
}

impl Plugin for PingProbe {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn host_key(&self) -> &str {
        self.base.host_key()
    }

    fn start(&self) -> Result<()> {
        self.base
            .write_status(StatusRow::new(TYPE_NAME, "PING: ...", Severity::Info, now_ts()));

        let base = Arc::clone(&self.base);
        let pinger = self.pinger.clone();
        let sent_initial = AtomicBool::new(false);
        let last_online = AtomicBool::new(false);

        self.worker.spawn_interval(self.every_sec, move || {
            let now = now_ts();
            let (ip, latency) = pinger.ping_once();
            let online = latency.is_some();
            let flipped = online != last_online.load(Ordering::Relaxed);
            let initial = !sent_initial.load(Ordering::Relaxed);

            if initial || flipped {
                if !initial && flipped {
                    base.write_log(if online { "is online" } else { "is offline" });
                }
                let (text, severity) = match latency {
                    Some(ms) => (format!("PING: {ms}ms"), Severity::Ok),
                    None => ("PING: -".to_string(), Severity::Bad),
                };
                base.write_status(StatusRow::new(TYPE_NAME, text, severity, now).with_ip(ip));
                sent_initial.store(true, Ordering::Relaxed);
            }
            last_online.store(online, Ordering::Relaxed);
        });
        Ok(())
    }

    fn stop(&self) {
        self.worker.stop();
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec::new("t", "traceroute")]
    }

    fn exec_command(&self, cmd: &CommandSpec) -> Result<()> {
        if cmd.key != "t" {
            return Ok(());
        }
        let base = Arc::clone(&self.base);
        let target = self.pinger.target.clone();
        // Detached on purpose: a traceroute may run for up to a minute and
        // must not stall dispatch or shutdown.
        std::thread::spawn(move || {
            base.write_log(&format!("TRACE {target}"));
            let args = vec![
                "-n".to_string(),
                "-m".to_string(),
                "20".to_string(),
                "-w".to_string(),
                "1".to_string(),
                target.clone(),
            ];
            match run_command("traceroute", &args, TRACE_TIMEOUT) {
                Ok(output) => {
                    for line in format_trace_output(&output.stdout) {
                        base.write_log(&line);
                    }
                    base.write_log("TRACE COMPLETE");
                }
                Err(err) => base.write_log(&format!("TRACE failed: {err:#}")),
            }
        });
        Ok(())
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
    fn extracts_ip_and_latency_from_ping_output() {
        let out = "PING db1 (192.168.1.20) 56(84) bytes of data.\n\
                   64 bytes from 192.168.1.20: icmp_seq=1 ttl=64 time=1.93 ms\n";
        assert_eq!(extract_ip(out).as_deref(), Some("192.168.1.20"));
        assert_eq!(extract_latency_ms(out), Some(2));
    }

    #[test]
    fn rejects_out_of_range_octets() {
        assert_eq!(extract_ip("from 300.1.2.3: nothing"), None);
        assert_eq!(extract_latency_ms("no latency here"), None);
    }

    #[test]
    fn sub_millisecond_latency_rounds_to_zero() {
        assert_eq!(extract_latency_ms("time=0.212 ms"), Some(0));
        assert_eq!(extract_latency_ms("time<1 ms"), Some(1));
    }

    #[test]
    fn trace_formatting_keeps_hop_lines_only() {
        let raw = "traceroute to db1 (10.0.0.5), 20 hops max\n\
                   1  10.0.0.1  0.31 ms  0.29 ms  0.25 ms\n\
                   2  * * *\n";
        let lines = format_trace_output(raw);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(" 1  10.0.0.1"));
        assert!(lines[1].starts_with(" 2  * * *"));
    }
}
