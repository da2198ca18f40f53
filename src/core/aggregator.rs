//! Central state aggregator.
//!
//! Owns per-host state, the operator-visible log, the always-populated
//! severity cache and command dispatch. Probe workers on any thread write
//! into it; the foreground loop reads render snapshots out of it. All shared
//! state sits behind two coarse locks: one for the host/selection maps and
//! one dedicated to the log buffer, so log writes from many workers never
//! contend with status writes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::plugin::Plugin;
use crate::core::status::{CommandSpec, StatusRow};
use crate::core::Severity;

/// Default capacity of the operator log buffer.
pub const DEFAULT_LOG_CAPACITY: usize = 512;

/// Mutable per-host state. Created lazily on first reference; lives for the
/// process lifetime (hosts are never removed).
#[derive(Default)]
struct HostState {
    host: String,
    ip: Option<String>,
    /// Latest visible row per full source key. Only display-enabled probe
    /// types ever land here.
    rows: HashMap<String, StatusRow>,
    /// Active operator commands, keyed by typed token.
    commands: HashMap<String, CommandSpec>,
    /// Live probe instances, keyed by probe type.
    executors: HashMap<String, Arc<dyn Plugin>>,
}

impl HostState {
    fn new(host: &str) -> Self {
        Self { host: host.to_string(), ..Self::default() }
    }

    fn log_enabled(&self) -> bool {
        self.executors.values().any(|p| p.log_messages())
    }
}

struct Inner {
    hosts: HashMap<String, HostState>,
    /// Display order of host keys, independently reorderable.
    host_order: Vec<String>,
    selected: usize,
    /// Latest row per (host, base type), populated on every write regardless
    /// of display suppression. Lets hidden probes still be queried.
    last_row: HashMap<(String, String), StatusRow>,
}

/// Render view of one host.
#[derive(Debug, Clone)]
pub struct HostView {
    pub host: String,
    pub ip: Option<String>,
    /// Rows sorted by source key for stable display.
    pub rows: Vec<StatusRow>,
    pub log_enabled: bool,
}

/// Cloned snapshot of everything the renderer needs.
#[derive(Debug, Clone, Default)]
pub struct DashboardSnapshot {
    pub hosts: Vec<HostView>,
    pub selected: usize,
    /// Selected host's commands, sorted by key.
    pub commands: Vec<CommandSpec>,
    pub log: Vec<String>,
    pub status_msg: String,
}

/// Thread-safe state aggregator shared by all probes and the renderer.
pub struct Aggregator {
    inner: Mutex<Inner>,
    log: Mutex<VecDeque<String>>,
    log_capacity: usize,
    status_msg: Mutex<String>,
    /// `show_in_table` per probe base type; unknown types default to shown.
    display_flags: HashMap<String, bool>,
}

impl Aggregator {
    pub fn new(display_flags: HashMap<String, bool>) -> Arc<Self> {
        Self::with_log_capacity(display_flags, DEFAULT_LOG_CAPACITY)
    }

    pub fn with_log_capacity(display_flags: HashMap<String, bool>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                hosts: HashMap::new(),
                host_order: Vec::new(),
                selected: 0,
                last_row: HashMap::new(),
            }),
            log: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            log_capacity: capacity.max(1),
            status_msg: Mutex::new("ready".to_string()),
            display_flags,
        })
    }

    fn show_in_table(&self, base_type: &str) -> bool {
        self.display_flags.get(base_type).copied().unwrap_or(true)
    }

    /// Idempotent get-or-create. The first host ever created becomes the
    /// initial selection.
    pub fn ensure_host(&self, host_key: &str) {
        let key = canonical_key(host_key);
        let mut inner = self.inner.lock();
        inner.ensure_host(&key);
    }

    /// Publish a status row. A row without a host is stamped with
    /// `host_key`. The severity cache is updated on every call; the visible
    /// row map only when the owning probe type is display-enabled.
    pub fn write_status(&self, host_key: &str, mut row: StatusRow) {
        if row.host.trim().is_empty() {
            row.host = canonical_key(host_key);
        } else {
            row.host = canonical_key(&row.host);
        }

        let base_type = row.base_type();
        let mut inner = self.inner.lock();

        inner
            .last_row
            .insert((row.host.clone(), base_type.clone()), row.clone());

        let host = row.host.clone();
        let state = inner.ensure_host(&host);

        if !self.show_in_table(&base_type) {
            return;
        }

        let source_key = row.source.trim().to_ascii_lowercase();
        if let Some(ip) = row.ip.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            state.ip = Some(ip.to_string());
        }
        state.rows.insert(if source_key.is_empty() { "?".to_string() } else { source_key }, row);
    }

    /// Append a timestamp-prefixed line to the operator log, dropping the
    /// oldest entries beyond capacity. Safe under concurrent callers.
    pub fn write_log(&self, msg: &str) {
        let line = format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), msg);
        let mut log = self.log.lock();
        log.push_back(line);
        while log.len() > self.log_capacity {
            log.pop_front();
        }
    }

    /// Record a live instance under its (host, type) and merge its declared
    /// commands into the host's command map. Each command payload is stamped
    /// with the owning probe type so dispatch can route back to it; a later
    /// registration under the same command key overwrites an earlier one.
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) {
        let type_key = plugin.type_name().trim().to_ascii_lowercase();
        let host_key = canonical_key(plugin.host_key());
        if type_key.is_empty() || host_key == "?" {
            return;
        }

        let commands = plugin.commands();

        let mut inner = self.inner.lock();
        let state = inner.ensure_host(&host_key);
        state.executors.insert(type_key.clone(), plugin);

        for mut cmd in commands {
            if cmd.key.trim().is_empty() {
                continue;
            }
            cmd.payload.insert("plugin".to_string(), serde_json::Value::String(type_key.clone()));
            state.commands.insert(cmd.key.clone(), cmd);
        }
    }

    /// Read-only lookup into the severity cache.
    pub fn get_last_severity(&self, host_key: &str, base_type: &str) -> Option<Severity> {
        let host = host_key.trim();
        let bt = base_type.trim().to_ascii_lowercase();
        if host.is_empty() || bt.is_empty() {
            return None;
        }
        let inner = self.inner.lock();
        inner.last_row.get(&(host.to_string(), bt)).map(|row| row.severity)
    }

    /// Currently selected host key, if any hosts exist.
    pub fn selected_host(&self) -> Option<String> {
        let mut inner = self.inner.lock();
        inner.clamp_selection();
        inner.host_order.get(inner.selected).cloned()
    }

    /// Select the N-th host, 1-based. Out-of-range is a no-op.
    pub fn select_by_number(&self, n: usize) -> bool {
        let mut inner = self.inner.lock();
        if n >= 1 && n <= inner.host_order.len() {
            inner.selected = n - 1;
            true
        } else {
            false
        }
    }

    /// Move the selection by `delta`, clamped to the host list.
    pub fn select_delta(&self, delta: i64) {
        let mut inner = self.inner.lock();
        if inner.host_order.is_empty() {
            inner.selected = 0;
            return;
        }
        let max = inner.host_order.len() as i64 - 1;
        inner.selected = (inner.selected as i64 + delta).clamp(0, max) as usize;
    }

    /// Reorder the host list: ascending configured order, ties broken by
    /// case-insensitive host key. Unlisted hosts sort last.
    pub fn apply_host_order(&self, orders: &HashMap<String, i64>) {
        let mut inner = self.inner.lock();
        inner
            .host_order
            .sort_by_key(|h| (orders.get(h).copied().unwrap_or(1000), h.to_lowercase()));
        inner.clamp_selection();
    }

    /// Parse and execute an operator-entered token.
    pub fn dispatch(&self, raw: &str) {
        let token = raw.trim();
        if token.is_empty() {
            *self.status_msg.lock() = "ready".to_string();
            return;
        }
        let token = token.split_whitespace().next().unwrap_or(token);

        match token {
            "++" => {
                self.toggle_all_log_messages(true);
                return;
            }
            "--" => {
                self.toggle_all_log_messages(false);
                return;
            }
            "ls+" => {
                self.toggle_selected_log_messages(true);
                return;
            }
            "ls-" => {
                self.toggle_selected_log_messages(false);
                return;
            }
            _ => {}
        }

        if token.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = token.parse::<usize>() {
                self.select_by_number(n);
            }
            return;
        }

        let Some(host_key) = self.selected_host() else {
            return;
        };

        // Resolve the command and its executor under the lock, invoke outside
        // of it: exec_command may write status or log lines.
        let (cmd, executor) = {
            let inner = self.inner.lock();
            let Some(state) = inner.hosts.get(&host_key) else {
                return;
            };
            let Some(cmd) = state.commands.get(token).cloned() else {
                drop(inner);
                self.write_log(&format!("{host_key}: unknown command: {token}"));
                return;
            };
            let plugin_key = cmd.payload_str("plugin").unwrap_or("?").to_ascii_lowercase();
            (cmd, state.executors.get(&plugin_key).cloned())
        };

        let Some(executor) = executor else {
            self.write_log(&format!(
                "{host_key}: no executor for plugin={}",
                cmd.payload_str("plugin").unwrap_or("?")
            ));
            return;
        };

        *self.status_msg.lock() = format!("cmd: {token}");
        if let Err(err) = executor.exec_command(&cmd) {
            self.write_log(&format!("{host_key}: :{token} failed: {err:#}"));
        }
    }

    fn toggle_all_log_messages(&self, enable: bool) {
        let executors: Vec<Arc<dyn Plugin>> = {
            let inner = self.inner.lock();
            inner
                .hosts
                .values()
                .flat_map(|state| state.executors.values().cloned())
                .collect()
        };
        debug!(enable, count = executors.len(), "toggling log messages on all instances");
        for plugin in executors {
            plugin.set_log_messages(enable);
        }
    }

    fn toggle_selected_log_messages(&self, enable: bool) {
        let Some(host_key) = self.selected_host() else {
            return;
        };
        let executors: Vec<Arc<dyn Plugin>> = {
            let inner = self.inner.lock();
            inner
                .hosts
                .get(&host_key)
                .map(|state| state.executors.values().cloned().collect())
                .unwrap_or_default()
        };
        for plugin in executors {
            plugin.set_log_messages(enable);
        }
    }

    /// Clone out everything the renderer needs for one frame.
    pub fn snapshot(&self) -> DashboardSnapshot {
        let mut inner = self.inner.lock();
        inner.clamp_selection();

        let hosts = inner
            .host_order
            .iter()
            .filter_map(|key| inner.hosts.get(key))
            .map(|state| {
                let mut rows: Vec<StatusRow> = state.rows.values().cloned().collect();
                rows.sort_by(|a, b| a.source.cmp(&b.source));
                HostView {
                    host: state.host.clone(),
                    ip: state.ip.clone(),
                    rows,
                    log_enabled: state.log_enabled(),
                }
            })
            .collect();

        let commands = inner
            .host_order
            .get(inner.selected)
            .and_then(|key| inner.hosts.get(key))
            .map(|state| {
                let mut cmds: Vec<CommandSpec> = state.commands.values().cloned().collect();
                cmds.sort_by(|a, b| a.key.cmp(&b.key));
                cmds
            })
            .unwrap_or_default();

        let selected = inner.selected;
        drop(inner);

        DashboardSnapshot {
            hosts,
            selected,
            commands,
            log: self.log.lock().iter().cloned().collect(),
            status_msg: self.status_msg.lock().clone(),
        }
    }

    /// Number of log lines currently buffered (test/diagnostic helper).
    pub fn log_len(&self) -> usize {
        self.log.lock().len()
    }
}

impl Inner {
    fn ensure_host(&mut self, key: &str) -> &mut HostState {
        if !self.hosts.contains_key(key) {
            self.hosts.insert(key.to_string(), HostState::new(key));
            self.host_order.push(key.to_string());
            if self.host_order.len() == 1 {
                self.selected = 0;
            }
        }
        self.hosts.get_mut(key).expect("host just ensured")
    }

    fn clamp_selection(&mut self) {
        if self.host_order.is_empty() {
            self.selected = 0;
        } else {
            self.selected = self.selected.min(self.host_order.len() - 1);
        }
    }
}

fn canonical_key(raw: &str) -> String {
    let key = raw.trim();
    if key.is_empty() {
        "?".to_string()
    } else {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::status::now_ts;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn flags(pairs: &[(&str, bool)]) -> HashMap<String, bool> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn row(source: &str, text: &str, severity: Severity) -> StatusRow {
        StatusRow::new(source, text, severity, now_ts())
    }

    struct FakePlugin {
        type_name: &'static str,
        host: &'static str,
        commands: Vec<CommandSpec>,
        log_flag: AtomicBool,
        execs: AtomicUsize,
        fail_exec: bool,
    }

    impl FakePlugin {
        fn new(type_name: &'static str, host: &'static str) -> Arc<Self> {
            Arc::new(Self {
                type_name,
                host,
                commands: Vec::new(),
                log_flag: AtomicBool::new(false),
                execs: AtomicUsize::new(0),
                fail_exec: false,
            })
        }

        fn with_commands(type_name: &'static str, host: &'static str, commands: Vec<CommandSpec>) -> Arc<Self> {
            Arc::new(Self {
                type_name,
                host,
                commands,
                log_flag: AtomicBool::new(false),
                execs: AtomicUsize::new(0),
                fail_exec: false,
            })
        }
    }

    impl Plugin for FakePlugin {
        fn type_name(&self) -> &str {
            self.type_name
        }

        fn host_key(&self) -> &str {
            self.host
        }

        fn commands(&self) -> Vec<CommandSpec> {
            self.commands.clone()
        }

        fn exec_command(&self, _cmd: &CommandSpec) -> anyhow::Result<()> {
            self.execs.fetch_add(1, Ordering::SeqCst);
            if self.fail_exec {
                anyhow::bail!("boom");
            }
            Ok(())
        }

        fn set_log_messages(&self, enable: bool) {
            self.log_flag.store(enable, Ordering::SeqCst);
        }

        fn log_messages(&self) -> bool {
            self.log_flag.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn hidden_types_feed_cache_but_not_visible_rows() {
        let agg = Aggregator::new(flags(&[("ssh", false), ("ping", true)]));
        agg.write_status("db1", row("ssh", "quiet", Severity::Warn));

        assert_eq!(agg.get_last_severity("db1", "ssh"), Some(Severity::Warn));
        let snap = agg.snapshot();
        // The suppressed write never created a visible host entry.
        assert!(snap.hosts.iter().all(|h| h.rows.is_empty()));

        agg.write_status("db1", row("ping", "PING: 3ms", Severity::Ok));
        let snap = agg.snapshot();
        let host = snap.hosts.iter().find(|h| h.host == "db1").unwrap();
        assert_eq!(host.rows.len(), 1);
        assert_eq!(host.rows[0].source, "ping");
    }

    #[test]
    fn latest_write_wins_per_source() {
        let agg = Aggregator::new(HashMap::new());
        agg.write_status("db1", row("ping", "PING: 3ms", Severity::Ok));
        agg.write_status("db1", row("ping", "PING: -", Severity::Bad));

        let snap = agg.snapshot();
        let host = snap.hosts.iter().find(|h| h.host == "db1").unwrap();
        assert_eq!(host.rows.len(), 1);
        assert_eq!(host.rows[0].text, "PING: -");
        assert_eq!(agg.get_last_severity("db1", "ping"), Some(Severity::Bad));
    }

    #[test]
    fn sub_sources_share_one_cache_slot_but_distinct_rows() {
        let agg = Aggregator::new(HashMap::new());
        agg.write_status("db1", row("processes:nginx", "PROC: nginx=OK", Severity::Ok));
        agg.write_status("db1", row("processes:redis", "PROC: redis=OFFLINE", Severity::Bad));

        let snap = agg.snapshot();
        let host = snap.hosts.iter().find(|h| h.host == "db1").unwrap();
        assert_eq!(host.rows.len(), 2);
        // Cache keyed by base type: last write wins.
        assert_eq!(agg.get_last_severity("db1", "processes"), Some(Severity::Bad));
    }

    #[test]
    fn log_buffer_keeps_only_the_last_capacity_lines_in_order() {
        let agg = Aggregator::with_log_capacity(HashMap::new(), 5);
        for i in 0..12 {
            agg.write_log(&format!("line {i}"));
        }
        let snap = agg.snapshot();
        assert_eq!(snap.log.len(), 5);
        for (offset, line) in snap.log.iter().enumerate() {
            assert!(line.ends_with(&format!("line {}", 7 + offset)), "got {line}");
        }
    }

    #[test]
    fn duplicate_command_keys_keep_only_the_later_registration() {
        let agg = Aggregator::new(HashMap::new());
        let first = FakePlugin::with_commands(
            "ping",
            "db1",
            vec![CommandSpec::new("r", "restart ping")],
        );
        let second = FakePlugin::with_commands(
            "ssh",
            "db1",
            vec![CommandSpec::new("r", "restart via ssh")],
        );
        agg.register_plugin(first);
        agg.register_plugin(second);

        agg.select_by_number(1);
        let snap = agg.snapshot();
        assert_eq!(snap.commands.len(), 1);
        assert_eq!(snap.commands[0].label, "restart via ssh");
        assert_eq!(snap.commands[0].payload_str("plugin"), Some("ssh"));
    }

    #[test]
    fn dispatch_routes_to_owning_executor() {
        let agg = Aggregator::new(HashMap::new());
        let plugin = FakePlugin::with_commands("ssh", "db1", vec![CommandSpec::new("rb", "reboot")]);
        agg.register_plugin(plugin.clone());

        agg.dispatch("rb");
        assert_eq!(plugin.execs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_logs_unknown_commands_and_failures() {
        let agg = Aggregator::new(HashMap::new());
        agg.register_plugin(FakePlugin::new("ping", "db1"));

        agg.dispatch("nope");
        let snap = agg.snapshot();
        assert!(snap.log.iter().any(|l| l.contains("unknown command: nope")));

        // Empty input is a no-op.
        let before = agg.log_len();
        agg.dispatch("   ");
        assert_eq!(agg.log_len(), before);
    }

    #[test]
    fn dispatch_failure_is_logged_with_message() {
        let agg = Aggregator::new(HashMap::new());
        let plugin = Arc::new(FakePlugin {
            type_name: "ssh",
            host: "db1",
            commands: vec![CommandSpec::new("x", "explode")],
            log_flag: AtomicBool::new(false),
            execs: AtomicUsize::new(0),
            fail_exec: true,
        });
        agg.register_plugin(plugin);

        agg.dispatch("x");
        let snap = agg.snapshot();
        assert!(snap.log.iter().any(|l| l.contains(":x failed") && l.contains("boom")));
    }

    #[test]
    fn numeric_dispatch_selects_in_range_hosts_only() {
        let agg = Aggregator::new(HashMap::new());
        agg.ensure_host("a");
        agg.ensure_host("b");

        agg.dispatch("2");
        assert_eq!(agg.selected_host().as_deref(), Some("b"));
        agg.dispatch("9");
        assert_eq!(agg.selected_host().as_deref(), Some("b"));
    }

    #[test]
    fn log_toggles_hit_all_or_selected_instances() {
        let agg = Aggregator::new(HashMap::new());
        let a = FakePlugin::new("ping", "a");
        let b = FakePlugin::new("ping", "b");
        agg.register_plugin(a.clone());
        agg.register_plugin(b.clone());

        agg.dispatch("++");
        assert!(a.log_messages() && b.log_messages());

        agg.select_by_number(2);
        agg.dispatch("ls-");
        assert!(a.log_messages());
        assert!(!b.log_messages());
    }

    #[test]
    fn first_host_becomes_initial_selection_and_order_is_reorderable() {
        let agg = Aggregator::new(HashMap::new());
        agg.ensure_host("zeta");
        agg.ensure_host("alpha");
        assert_eq!(agg.selected_host().as_deref(), Some("zeta"));

        let orders = HashMap::from([("alpha".to_string(), 1), ("zeta".to_string(), 2)]);
        agg.apply_host_order(&orders);
        let snap = agg.snapshot();
        assert_eq!(snap.hosts[0].host, "alpha");
    }
}
