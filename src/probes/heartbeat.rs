//! UDP heartbeat probe.
//!
//! Attaches to a shared multiplexer listener and classifies the host by the
//! age of its most recent attributed datagram: fresh is ok, stale is warn,
//! silent past the offline threshold (or never heard from) is bad. The probe
//! itself never touches a socket; all receive work happens in the listener
//! worker, which calls back into the subscriber on its emission schedule.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::core::{Params, Plugin, PluginBase, PluginContext, PluginMeta, Severity, StatusRow};
use crate::net::mux::{EndpointListener, EndpointMux, MuxSubscriber, TrafficStats};
use crate::params_table;

pub const TYPE_NAME: &str = "udp";

pub fn meta() -> PluginMeta {
    PluginMeta {
        type_name: TYPE_NAME,
        default_params: params_table! {
            "bind_ip" => "0.0.0.0",
            "port" => 5000,
            "emit_every_sec" => 0.25,
            "ok_after_sec" => 1.0,
            "offline_after_sec" => 10.0,
            "service_name" => "UDP",
            "show_packet_stats" => true,
            "aliases" => toml::Value::Array(Vec::new()),
        },
        expose_status: true,
        show_in_table: true,
    }
}

pub fn create(ctx: &PluginContext, host_key: &str, params: Params) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(HeartbeatProbe::new(ctx, host_key, &params)))
}

/// Staleness thresholds for one heartbeat stream.
#[derive(Debug, Clone, Copy)]
struct Thresholds {
    ok_after_sec: f64,
    offline_after_sec: f64,
}

/// Severity and display text for the current heartbeat age.
fn classify(service: &str, now: f64, stats: &TrafficStats, t: Thresholds) -> (Severity, String) {
    if stats.last_seen_ts <= 0.0 {
        return (Severity::Bad, format!("{service}: OFFLINE"));
    }
    let age = now - stats.last_seen_ts;
    if age >= t.offline_after_sec {
        (Severity::Bad, format!("{service}: OFFLINE {age:.0}s"))
    } else if age <= t.ok_after_sec {
        (Severity::Ok, format!("{service}: OK"))
    } else {
        (Severity::Warn, format!("{service}: STALE {age:.1}s"))
    }
}

fn append_stats(text: &mut String, stats: &TrafficStats) {
    text.push_str(&format!(" ({:.1} pps, {} pkts)", stats.pps, stats.packet_count));
}

/// The listener-side half: receives mux callbacks on the worker thread and
/// turns them into status rows and log lines.
struct HeartbeatSub {
    base: Arc<PluginBase>,
    service: String,
    thresholds: Thresholds,
    show_packet_stats: bool,
}

impl MuxSubscriber for HeartbeatSub {
    fn host_key(&self) -> &str {
        self.base.host_key()
    }

    fn log_messages(&self) -> bool {
        self.base.log_messages()
    }

    fn forward_message(&self, raw: &str) {
        self.base.write_log(raw);
    }

    fn on_status(&self, now: f64, stats: &TrafficStats) {
        let (severity, mut text) = classify(&self.service, now, stats, self.thresholds);
        if self.show_packet_stats && severity != Severity::Bad {
            append_stats(&mut text, stats);
        }
        self.base.write_status(StatusRow::new(TYPE_NAME, text, severity, now));
    }
}

pub struct HeartbeatProbe {
    base: Arc<PluginBase>,
    mux: Arc<EndpointMux>,
    sub: Arc<HeartbeatSub>,
    listener: Mutex<Option<Arc<EndpointListener>>>,
    bind_ip: String,
    port: u16,
    emit_every_sec: f64,
    service: String,
    aliases: Vec<String>,
}

impl HeartbeatProbe {
    fn new(ctx: &PluginContext, host_key: &str, params: &Params) -> Self {
        let base = PluginBase::new(Arc::clone(&ctx.aggregator), TYPE_NAME, host_key);
        let service = params
            .get_str("service_name")
            .unwrap_or_else(|| "UDP".to_string())
            .to_uppercase();

        // The host address and display name are implicit aliases; heartbeats
        // commonly arrive from the address the host is configured under.
        let mut aliases = params.get_str_list("aliases");
        for key in ["host", "name"] {
            if let Some(value) = params.get_str(key) {
                if !aliases.iter().any(|a| a.eq_ignore_ascii_case(&value)) {
                    aliases.push(value);
                }
            }
        }

        let thresholds = Thresholds {
            ok_after_sec: params.get_f64("ok_after_sec", 1.0).max(0.0),
            offline_after_sec: params.get_f64("offline_after_sec", 10.0).max(0.1),
        };
        let sub = Arc::new(HeartbeatSub {
            base: Arc::clone(&base),
            service: service.clone(),
            thresholds,
            show_packet_stats: params.get_bool("show_packet_stats", true),
        });

        Self {
            base,
            mux: Arc::clone(&ctx.mux),
            sub,
            listener: Mutex::new(None),
            bind_ip: params.get_str("bind_ip").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: u16::try_from(params.get_i64("port", 5000)).unwrap_or(5000),
            emit_every_sec: params.get_f64("emit_every_sec", 0.25),
            service,
            aliases,
        }
    }

    fn as_subscriber(&self) -> Arc<dyn MuxSubscriber> {
        Arc::clone(&self.sub) as Arc<dyn MuxSubscriber>
    }
}

impl Plugin for HeartbeatProbe {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn host_key(&self) -> &str {
        self.base.host_key()
    }

    fn start(&self) -> Result<()> {
        // Timestamp 0.0 marks "never heard from"; the first emission
        // overwrites this row either way.
        self.base.write_status(StatusRow::new(
            TYPE_NAME,
            format!("{}: OFFLINE", self.service),
            Severity::Bad,
            0.0,
        ));
        let listener = self.mux.subscribe(
            &self.bind_ip,
            self.port,
            self.emit_every_sec,
            &self.aliases,
            self.as_subscriber(),
        );
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    fn stop(&self) {
        if self.listener.lock().take().is_some() {
            self.mux.unsubscribe(&self.bind_ip, self.port, &self.as_subscriber());
        }
    }

    fn set_log_messages(&self, enable: bool) {
        self.base.set_log_messages(enable);
    }

    fn log_messages(&self) -> bool {
        self.base.log_messages()
    }
}
