//! HTTP reachability probe.
//!
//! Issues a HEAD request per cycle with a hard timeout and classifies the
//! status code: 2xx/3xx ok, 4xx warn, everything else (including transport
//! errors) bad. Rows are written on the initial sample and on severity
//! changes only; changes also get a transition line in the operator log.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;

use crate::core::{
    now_ts, Params, Plugin, PluginBase, PluginContext, PluginMeta, Severity, StatusRow,
};
use crate::params_table;
use crate::probes::worker::ProbeWorker;

pub const TYPE_NAME: &str = "http";

pub fn meta() -> PluginMeta {
    PluginMeta {
        type_name: TYPE_NAME,
        default_params: params_table! {
            "port" => 0,
            "url" => "/",
            "force_https" => false,
            "every_sec" => 5.0,
            "timeout_sec" => 2.0,
        },
        expose_status: true,
        show_in_table: true,
    }
}

pub fn create(ctx: &PluginContext, host_key: &str, params: Params) -> Result<Arc<dyn Plugin>> {
    Ok(Arc::new(HttpProbe::new(ctx, host_key, &params)))
}

/// Compose the check URL from host/port/path configuration.
fn build_url(host: &str, port: Option<u16>, path: &str, force_https: bool) -> Option<String> {
    let host = host.trim();
    let path = path.trim();
    if host.is_empty() || path.is_empty() {
        return None;
    }
    let scheme = if force_https { "https" } else { "http" };
    let base = match port {
        Some(p) => format!("{scheme}://{host}:{p}"),
        None => format!("{scheme}://{host}"),
    };
    Some(if path.starts_with('/') { format!("{base}{path}") } else { format!("{base}/{path}") })
}

/// Severity and display text for one probe result.
fn classify(code: Option<u16>) -> (Severity, String) {
    match code {
        None => (Severity::Bad, "HTTP: ERR".to_string()),
        Some(c @ 200..=399) => (Severity::Ok, format!("HTTP: {c}")),
        Some(c @ 400..=499) => (Severity::Warn, format!("HTTP: {c}")),
        Some(c) => (Severity::Bad, format!("HTTP: {c}")),
    }
}

/// One HEAD request; `(status code, error text)`.
fn fetch(client: &reqwest::blocking::Client, url: &str) -> (Option<u16>, String) {
    match client.head(url).send() {
        Ok(response) => (Some(response.status().as_u16()), String::new()),
        Err(err) => (None, err.to_string()),
    }
}

pub struct HttpProbe {
    base: Arc<PluginBase>,
    url: Option<String>,
    every_sec: f64,
    timeout: Duration,
    worker: ProbeWorker,
}

impl HttpProbe {
    fn new(ctx: &PluginContext, host_key: &str, params: &Params) -> Self {
        let base = PluginBase::new(Arc::clone(&ctx.aggregator), TYPE_NAME, host_key);
        let host = params.get_str("host").unwrap_or_else(|| base.host_key().to_string());
        let port = u16::try_from(params.get_i64("port", 0)).ok().filter(|p| *p > 0);
        let path = params.get_str("url").unwrap_or_else(|| "/".to_string());
        let force_https = params.get_bool("force_https", false);

        Self {
            base,
            url: build_url(&host, port, &path, force_https),
            every_sec: params.get_f64("every_sec", 5.0),
            timeout: Duration::from_secs_f64(params.get_f64("timeout_sec", 2.0).max(0.1)),
            worker: ProbeWorker::new(),
        }
    }
}

impl Plugin for HttpProbe {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn host_key(&self) -> &str {
        self.base.host_key()
    }

    fn start(&self) -> Result<()> {
        let initial = if self.url.is_some() { "HTTP: ..." } else { "HTTP: -" };
        self.base.write_status(StatusRow::new(TYPE_NAME, initial, Severity::Info, now_ts()));

        let Some(url) = self.url.clone() else {
            return Ok(());
        };

        let client = reqwest::blocking::Client::builder().timeout(self.timeout).build()?;

        let base = Arc::clone(&self.base);
        let last_sev: Mutex<Option<Severity>> = Mutex::new(None);

        self.worker.spawn_interval(self.every_sec, move || {
            let now = now_ts();
            let (code, err) = fetch(&client, &url);
            let (severity, mut text) = classify(code);
            if severity != Severity::Ok && !err.is_empty() {
                text = format!("{text} ({err})");
            }

            let mut last = last_sev.lock();
            if *last != Some(severity) {
                if let Some(prev) = *last {
                    base.write_log(&format!("HTTP: {prev} -> {severity}"));
                }
                base.write_status(StatusRow::new(TYPE_NAME, text, severity, now));
                *last = Some(severity);
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
    fn url_composition() {
        assert_eq!(
            build_url("db1", Some(8080), "health", false).as_deref(),
            Some("http://db1:8080/health")
        );
        assert_eq!(
            build_url("db1", None, "/health", true).as_deref(),
            Some("https://db1/health")
        );
        assert_eq!(build_url("", None, "/", false), None);
        assert_eq!(build_url("db1", None, "  ", false), None);
    }

    #[test]
    fn classification_buckets() {
        assert_eq!(classify(Some(204)).0, Severity::Ok);
        assert_eq!(classify(Some(301)).0, Severity::Ok);
        assert_eq!(classify(Some(404)).0, Severity::Warn);
        assert_eq!(classify(Some(503)).0, Severity::Bad);
        let (sev, text) = classify(None);
        assert_eq!(sev, Severity::Bad);
        assert_eq!(text, "HTTP: ERR");
    }
}
