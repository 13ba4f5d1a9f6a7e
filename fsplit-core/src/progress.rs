//! Per-operation progress and cancellation.
//!
//! A [`Progress`] is created by the caller and handed to exactly one running
//! operation, which is its only writer. Clones share state, so any number of
//! observers (a reporter thread, a UI, a signal handler calling
//! [`Progress::cancel`]) can read it concurrently.

use crate::error::{Result, SplitError};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    interval: Duration,
    stage: Arc<Mutex<String>>,
    current: Arc<Mutex<String>>,
    bytes_done: Arc<AtomicU64>,
    bytes_total: Arc<AtomicU64>,
    finished: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(false)
    }
}

fn guard(m: &Mutex<String>) -> MutexGuard<'_, String> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Progress {
    /// `enabled` only controls the stderr reporter; counters and the cancel
    /// flag always work.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            interval: Duration::from_secs(1),
            stage: Arc::new(Mutex::new(String::new())),
            current: Arc::new(Mutex::new(String::new())),
            bytes_done: Arc::new(AtomicU64::new(0)),
            bytes_total: Arc::new(AtomicU64::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn set_stage(&self, s: &str) {
        *guard(&self.stage) = s.to_string();
    }
    pub fn stage(&self) -> String {
        guard(&self.stage).clone()
    }

    /// Name of the file currently being produced or consumed.
    pub fn set_current(&self, name: &str) {
        *guard(&self.current) = name.to_string();
    }
    pub fn current(&self) -> String {
        guard(&self.current).clone()
    }

    pub fn reset_bytes(&self, total: u64) {
        self.bytes_total.store(total, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
        self.finished.store(false, Ordering::Relaxed);
    }
    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }
    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    /// Mark the pass complete; [`Progress::fraction`] reports 1.0 afterwards
    /// even for an empty input.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    /// Bytes consumed over bytes expected, clamped to `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.finished.load(Ordering::Relaxed) {
            return 1.0;
        }
        let total = self.bytes_total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.bytes_done() as f64 / total as f64).min(1.0)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Cancellation point: polled once per buffer transfer.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SplitError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while this.running.load(Ordering::Relaxed) {
                thread::sleep(this.interval);
                if !this.running.load(Ordering::Relaxed) {
                    break;
                }
                eprintln!(
                    "[{:>4}s] {} | {} | {}%",
                    t0.elapsed().as_secs(),
                    this.stage(),
                    this.current(),
                    (this.fraction() * 100.0) as i32
                );
            }
        });
    }
    pub fn stop(&self) {
        if self.enabled {
            self.running.store(false, Ordering::Relaxed);
        }
    }
}
