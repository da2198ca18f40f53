//! Cooperative background worker used by the polling probes.
//!
//! A probe's `start` spawns one worker; `stop` raises the flag and joins.
//! The worker body runs at a fixed cadence while the loop polls the stop
//! flag every 50 ms, so shutdown latency is bounded by the poll interval
//! plus whatever timeout the in-flight operation itself carries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::core::now_ts;
use crate::probes::exec::POLL_INTERVAL;

/// Minimum cadence; guards against zero/negative configuration values.
const MIN_EVERY_SEC: f64 = 0.2;

/// Handle to one background polling thread.
#[derive(Default)]
pub struct ProbeWorker {
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ProbeWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the worker; `body` runs once every `every_sec` seconds until
    /// stopped. A second call while the worker lives is a no-op.
    pub fn spawn_interval<F>(&self, every_sec: f64, mut body: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        self.stop.store(false, Ordering::SeqCst);

        let stop = Arc::clone(&self.stop);
        let every = every_sec.max(MIN_EVERY_SEC);
        *handle = Some(std::thread::spawn(move || {
            let mut next = 0.0f64;
            while !stop.load(Ordering::SeqCst) {
                let now = now_ts();
                if now >= next {
                    next = now + every;
                    body();
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }));
    }

    /// Signal the worker and wait for it to exit. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            // Best effort; a panicked worker must not block shutdown.
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl Drop for ProbeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
