//! Shared UDP endpoint multiplexer.
//!
//! Many probe instances across hosts may need to receive datagrams on one
//! shared endpoint; opening one socket per subscriber wastes descriptors and
//! can fail outright on exclusive bind semantics. The mux keeps at most one
//! listener per (bind address, port). The first subscriber creates the
//! listener and its receive worker; later subscribers attach. The listener's
//! lifetime is strictly subordinate to its subscriber count: when the last
//! subscriber leaves, the worker is signaled, the socket closed and the
//! table entry removed (idle teardown).
//!
//! Attribution of an inbound datagram to a host is done strictly by the
//! packet's network source address, matched case-insensitively against the
//! alias map. Payload-declared identifiers are accepted for display and
//! logging only, never for attribution, so a forged payload cannot claim
//! another host's identity.

use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::core::now_ts;

/// Receive timeout of the listener worker; bounds stop-flag latency and the
/// emission schedule even with no traffic.
const RECV_TIMEOUT: Duration = Duration::from_millis(200);

const MAX_DATAGRAM: usize = 65_535;

/// Per-host traffic counters kept by a listener.
#[derive(Debug, Clone, Default)]
pub struct TrafficStats {
    /// Unix timestamp of the last attributed datagram; 0.0 for "never".
    pub last_seen_ts: f64,
    pub packet_count: u64,
    pub byte_count: u64,
    /// Rate baseline: timestamp and packet count at the last rate update.
    pub last_rate_ts: f64,
    pub last_rate_packets: u64,
    /// Packets per second over the last emission interval.
    pub pps: f64,
}

impl TrafficStats {
    /// Advance the rate baseline. The first sample only seeds the baseline
    /// instead of emitting a rate, so no rate is ever computed against an
    /// undefined prior time.
    pub fn update_rate(&mut self, now: f64) {
        if self.last_rate_ts <= 0.0 {
            self.last_rate_ts = now;
            self.last_rate_packets = self.packet_count;
            self.pps = 0.0;
            return;
        }
        let dt = now - self.last_rate_ts;
        if dt <= 0.0 {
            return;
        }
        let dp = self.packet_count.saturating_sub(self.last_rate_packets) as f64;
        self.pps = (dp / dt).max(0.0);
        self.last_rate_ts = now;
        self.last_rate_packets = self.packet_count;
    }
}

/// A logical subscriber attached to a shared listener.
///
/// Implemented by probes that consume heartbeat traffic. The mux calls
/// `forward_message` for raw payload text when logging is enabled, and
/// `on_status` from the periodic emission with a stats snapshot.
pub trait MuxSubscriber: Send + Sync {
    /// Canonical host key this subscriber receives traffic for.
    fn host_key(&self) -> &str;

    /// Whether raw payloads should be forwarded into the operator log.
    fn log_messages(&self) -> bool;

    /// Raw payload text of an attributed datagram (log forwarding).
    fn forward_message(&self, raw: &str);

    /// Periodic status callback with the host's current traffic stats.
    fn on_status(&self, now: f64, stats: &TrafficStats);
}

struct ListenerState {
    /// Lowercased alias (name or address) -> canonical host key.
    aliases: HashMap<String, String>,
    /// Canonical host key -> traffic stats.
    stats: HashMap<String, TrafficStats>,
    /// Canonical host key -> attached subscribers.
    subs: HashMap<String, Vec<Arc<dyn MuxSubscriber>>>,
}

/// One shared listener bound to a single UDP endpoint.
pub struct EndpointListener {
    bind_ip: String,
    port: u16,
    emit_every_sec: f64,
    state: Mutex<ListenerState>,
    stop: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Actual bound address, set by the worker once the bind succeeds.
    local_port: Mutex<Option<u16>>,
}

impl EndpointListener {
    fn new(bind_ip: &str, port: u16, emit_every_sec: f64) -> Arc<Self> {
        Arc::new(Self {
            bind_ip: bind_ip.to_string(),
            port,
            emit_every_sec: if emit_every_sec > 0.0 { emit_every_sec } else { 0.25 },
            state: Mutex::new(ListenerState {
                aliases: HashMap::new(),
                stats: HashMap::new(),
                subs: HashMap::new(),
            }),
            stop: AtomicBool::new(false),
            worker: Mutex::new(None),
            local_port: Mutex::new(None),
        })
    }

    /// Port the worker actually bound (differs from the requested port when
    /// binding port 0). `None` until the bind has happened.
    pub fn local_port(&self) -> Option<u16> {
        *self.local_port.lock()
    }

    fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let listener = Arc::clone(self);
        *worker = Some(std::thread::spawn(move || listener.run()));
    }

    fn add_sub(&self, host_key: &str, aliases: &[String], sub: Arc<dyn MuxSubscriber>) {
        let canonical = host_key.trim().to_string();
        let mut state = self.state.lock();
        state.subs.entry(canonical.clone()).or_default().push(sub);
        state.aliases.insert(canonical.to_lowercase(), canonical.clone());
        for alias in aliases {
            let alias = alias.trim();
            if !alias.is_empty() {
                state.aliases.insert(alias.to_lowercase(), canonical.clone());
            }
        }
        state.stats.entry(canonical).or_default();
    }

    /// Detach one subscriber. The last subscriber for a host purges the
    /// host's stats and every alias entry pointing to it.
    fn remove_sub(&self, sub: &Arc<dyn MuxSubscriber>) {
        let host_key = sub.host_key().trim().to_string();
        // Compare data pointers only; Arc::ptr_eq on trait objects also
        // compares vtable pointers, which are not unique across codegen units.
        let target = Arc::as_ptr(sub).cast::<()>();
        let mut state = self.state.lock();
        let remaining = {
            let Some(list) = state.subs.get_mut(&host_key) else {
                return;
            };
            list.retain(|p| Arc::as_ptr(p).cast::<()>() != target);
            list.len()
        };
        if remaining > 0 {
            return;
        }
        state.subs.remove(&host_key);
        state.stats.remove(&host_key);
        state.aliases.retain(|_, canonical| *canonical != host_key);
    }

    fn has_subs(&self) -> bool {
        !self.state.lock().subs.is_empty()
    }

    /// Signal the worker and wait for it to exit; the socket closes with it.
    /// Idempotent and safe on an already-idle listener.
    fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            // Teardown is best effort; a panicked worker must not block shutdown.
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        let socket = match UdpSocket::bind((self.bind_ip.as_str(), self.port)) {
            Ok(sock) => sock,
            Err(err) => {
                error!(bind = %self.bind_ip, port = self.port, %err, "udp bind failed");
                return;
            }
        };
        if let Err(err) = socket.set_read_timeout(Some(RECV_TIMEOUT)) {
            error!(%err, "udp read timeout could not be set");
            return;
        }
        if let Ok(addr) = socket.local_addr() {
            *self.local_port.lock() = Some(addr.port());
        }
        debug!(bind = %self.bind_ip, port = self.port, "udp listener started");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let mut next_emit = 0.0f64;

        while !self.stop.load(Ordering::SeqCst) {
            let now = now_ts();

            match socket.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    let raw = String::from_utf8_lossy(&buf[..len]).trim().to_string();
                    self.handle_datagram(now, &addr.ip().to_string(), len, &raw);
                }
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut => {}
                Err(err) => {
                    // A malformed or oversized datagram, or an abrupt peer
                    // reset, must never terminate the listener.
                    trace!(%err, "udp receive error");
                }
            }

            let now = now_ts();
            if now >= next_emit {
                next_emit = now + self.emit_every_sec;
                self.emit(now);
            }
        }
        debug!(bind = %self.bind_ip, port = self.port, "udp listener stopped");
    }

    fn handle_datagram(&self, now: f64, sender_ip: &str, len: usize, raw: &str) {
        // Attribution strictly by source address; a payload-declared name is
        // display-only and never consulted here.
        let mut forward_to: Vec<Arc<dyn MuxSubscriber>> = Vec::new();
        {
            let mut state = self.state.lock();
            let Some(canonical) = state.aliases.get(&sender_ip.to_lowercase()).cloned() else {
                return;
            };
            let stats = state.stats.entry(canonical.clone()).or_default();
            stats.last_seen_ts = now;
            stats.packet_count += 1;
            stats.byte_count += len as u64;

            if let Some(subs) = state.subs.get(&canonical) {
                if subs.iter().any(|s| s.log_messages()) {
                    forward_to = subs.iter().filter(|s| s.log_messages()).cloned().collect();
                }
            }
        }
        for sub in forward_to {
            sub.forward_message(raw);
        }
    }

    fn emit(&self, now: f64) {
        let (stats_snap, subs_snap) = {
            let mut state = self.state.lock();
            for stats in state.stats.values_mut() {
                stats.update_rate(now);
            }
            (state.stats.clone(), state.subs.clone())
        };

        for (host, subs) in subs_snap {
            let stats = stats_snap.get(&host).cloned().unwrap_or_default();
            for sub in subs {
                sub.on_status(now, &stats);
            }
        }
    }
}

/// Process-wide table of shared listeners, owned by the application context
/// and injected into the probes that need it.
#[derive(Default)]
pub struct EndpointMux {
    listeners: Mutex<HashMap<(String, u16), Arc<EndpointListener>>>,
}

impl EndpointMux {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a subscriber to the listener for `(bind_ip, port)`, creating
    /// the listener (and its receive worker) on first use. `emit_every_sec`
    /// only takes effect for a newly created listener.
    pub fn subscribe(
        &self,
        bind_ip: &str,
        port: u16,
        emit_every_sec: f64,
        aliases: &[String],
        sub: Arc<dyn MuxSubscriber>,
    ) -> Arc<EndpointListener> {
        let key = (bind_ip.trim().to_lowercase(), port);
        let listener = {
            let mut listeners = self.listeners.lock();
            Arc::clone(
                listeners
                    .entry(key)
                    .or_insert_with(|| EndpointListener::new(bind_ip, port, emit_every_sec)),
            )
        };
        let host_key = sub.host_key().to_string();
        listener.add_sub(&host_key, aliases, sub);
        listener.start();
        listener
    }

    /// Detach a subscriber; tears the listener down when it becomes idle.
    pub fn unsubscribe(&self, bind_ip: &str, port: u16, sub: &Arc<dyn MuxSubscriber>) {
        let key = (bind_ip.trim().to_lowercase(), port);
        let listener = {
            let listeners = self.listeners.lock();
            listeners.get(&key).cloned()
        };
        let Some(listener) = listener else {
            return;
        };
        listener.remove_sub(sub);
        if !listener.has_subs() {
            listener.shutdown();
            self.listeners.lock().remove(&key);
        }
    }

    /// Number of live listeners (diagnostic/test helper).
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use serial_test::serial;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    struct RecordingSub {
        host: String,
        log_enabled: AtomicBool,
        messages: PlMutex<Vec<String>>,
        statuses: PlMutex<Vec<TrafficStats>>,
    }

    impl RecordingSub {
        fn new(host: &str) -> Arc<Self> {
            Arc::new(Self {
                host: host.to_string(),
                log_enabled: AtomicBool::new(false),
                messages: PlMutex::new(Vec::new()),
                statuses: PlMutex::new(Vec::new()),
            })
        }
    }

    impl MuxSubscriber for RecordingSub {
        fn host_key(&self) -> &str {
            &self.host
        }

        fn log_messages(&self) -> bool {
            self.log_enabled.load(Ordering::SeqCst)
        }

        fn forward_message(&self, raw: &str) {
            self.messages.lock().push(raw.to_string());
        }

        fn on_status(&self, _now: f64, stats: &TrafficStats) {
            self.statuses.lock().push(stats.clone());
        }
    }

    fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn as_dyn(sub: &Arc<RecordingSub>) -> Arc<dyn MuxSubscriber> {
        Arc::clone(sub) as Arc<dyn MuxSubscriber>
    }

    #[test]
    fn rate_baseline_seeds_before_reporting() {
        let mut stats = TrafficStats { packet_count: 40, ..TrafficStats::default() };
        stats.update_rate(100.0);
        assert!((stats.pps - 0.0).abs() < f64::EPSILON);
        assert_eq!(stats.last_rate_packets, 40);

        // 10 packets over 2 seconds.
        stats.packet_count = 50;
        stats.update_rate(102.0);
        assert!((stats.pps - 5.0).abs() < 1e-9);
    }

    #[test]
    fn rate_ignores_non_advancing_clock() {
        let mut stats = TrafficStats::default();
        stats.update_rate(50.0);
        stats.packet_count = 10;
        stats.update_rate(50.0);
        assert!((stats.pps - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    #[serial]
    fn two_subscribers_share_one_listener_and_idle_teardown() {
        let mux = EndpointMux::new();
        let a = RecordingSub::new("a");
        let b = RecordingSub::new("b");

        mux.subscribe("127.0.0.1", 0, 0.05, &[], as_dyn(&a));
        mux.subscribe("127.0.0.1", 0, 0.05, &[], as_dyn(&b));
        assert_eq!(mux.listener_count(), 1);

        mux.unsubscribe("127.0.0.1", 0, &as_dyn(&a));
        assert_eq!(mux.listener_count(), 1);
        mux.unsubscribe("127.0.0.1", 0, &as_dyn(&b));
        assert_eq!(mux.listener_count(), 0);

        // Idempotent on an already-idle endpoint.
        mux.unsubscribe("127.0.0.1", 0, &as_dyn(&b));
        assert_eq!(mux.listener_count(), 0);
    }

    #[test]
    #[serial]
    fn demux_attributes_by_source_address_not_payload() {
        let mux = EndpointMux::new();
        let sub = RecordingSub::new("x");
        sub.log_enabled.store(true, Ordering::SeqCst);

        let listener =
            mux.subscribe("127.0.0.1", 0, 0.05, &["127.0.0.1".to_string()], as_dyn(&sub));
        wait_for("bind", || listener.local_port().is_some());
        let port = listener.local_port().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(br#"{"name":"someone-else"}"#, ("127.0.0.1", port)).unwrap();

        wait_for("forwarded message", || !sub.messages.lock().is_empty());
        assert!(sub.messages.lock()[0].contains("someone-else"));

        // Stats landed under the canonical host attributed by address.
        wait_for("status emission", || {
            sub.statuses.lock().iter().any(|s| s.packet_count == 1)
        });

        mux.unsubscribe("127.0.0.1", 0, &as_dyn(&sub));
    }

    #[test]
    #[serial]
    fn unattributed_datagrams_update_nothing() {
        let mux = EndpointMux::new();
        // Alias set deliberately excludes the loopback source address.
        let sub = RecordingSub::new("remote-host");
        let listener = mux.subscribe("127.0.0.1", 0, 0.05, &[], as_dyn(&sub));
        wait_for("bind", || listener.local_port().is_some());
        let port = listener.local_port().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"hello", ("127.0.0.1", port)).unwrap();

        wait_for("emission", || !sub.statuses.lock().is_empty());
        assert!(sub.statuses.lock().iter().all(|s| s.packet_count == 0));

        mux.unsubscribe("127.0.0.1", 0, &as_dyn(&sub));
    }

    #[test]
    #[serial]
    fn burst_rate_converges_and_first_emission_is_zero() {
        let mux = EndpointMux::new();
        let sub = RecordingSub::new("x");
        let listener =
            mux.subscribe("127.0.0.1", 0, 0.1, &["127.0.0.1".to_string()], as_dyn(&sub));
        wait_for("bind", || listener.local_port().is_some());
        let port = listener.local_port().unwrap();

        // First emission happens before any traffic: baseline seeding only.
        wait_for("first emission", || !sub.statuses.lock().is_empty());
        assert!((sub.statuses.lock()[0].pps - 0.0).abs() < f64::EPSILON);

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for _ in 0..20 {
            sender.send_to(b"tick", ("127.0.0.1", port)).unwrap();
        }

        wait_for("nonzero rate", || sub.statuses.lock().iter().any(|s| s.pps > 0.0));

        mux.unsubscribe("127.0.0.1", 0, &as_dyn(&sub));
    }
}
