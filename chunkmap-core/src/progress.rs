use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

const REPORT_EVERY: Duration = Duration::from_secs(5);

/// Shared counters for long-running operations, optionally reported by a
/// background thread.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    every: Duration,
    stage: Arc<Mutex<String>>,
    chunks_done: Arc<AtomicU64>,
    chunks_total: Arc<AtomicU64>,
    bytes_done: Arc<AtomicU64>,
    bytes_total: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    // Bumped on every start; a reporter exits once it no longer owns the
    // current generation.
    generation: Arc<AtomicU64>,
    reporters: Arc<AtomicU64>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(false)
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("enabled", &self.enabled)
            .field("chunks_done", &self.chunks_done())
            .field("bytes_done", &self.bytes_done())
            .finish()
    }
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            every: REPORT_EVERY,
            stage: Arc::new(Mutex::new(String::new())),
            chunks_done: Arc::new(AtomicU64::new(0)),
            chunks_total: Arc::new(AtomicU64::new(0)),
            bytes_done: Arc::new(AtomicU64::new(0)),
            bytes_total: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            reporters: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Report period for the background thread.
    pub fn with_interval(mut self, every: Duration) -> Self {
        self.every = every;
        self
    }

    pub fn set_stage(&self, s: &str) {
        if let Ok(mut stage) = self.stage.lock() {
            *stage = s.to_string();
        }
    }

    /// Reset all counters for a new stage.
    pub fn begin(&self, stage: &str, chunks_total: u64, bytes_total: u64) {
        self.set_stage(stage);
        self.chunks_total.store(chunks_total, Ordering::Relaxed);
        self.chunks_done.store(0, Ordering::Relaxed);
        self.bytes_total.store(bytes_total, Ordering::Relaxed);
        self.bytes_done.store(0, Ordering::Relaxed);
    }

    pub fn inc_chunk(&self) {
        self.chunks_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, n: u64) {
        self.bytes_done.fetch_add(n, Ordering::Relaxed);
    }

    pub fn chunks_done(&self) -> u64 {
        self.chunks_done.load(Ordering::Relaxed)
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done.load(Ordering::Relaxed)
    }

    /// Number of reporter threads still alive.
    pub fn active_reporters(&self) -> u64 {
        self.reporters.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        if !self.enabled || self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.reporters.fetch_add(1, Ordering::SeqCst);
        let this = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            let current = || {
                this.running.load(Ordering::SeqCst) && this.generation.load(Ordering::SeqCst) == gen
            };
            while current() {
                thread::sleep(this.every);
                if !current() {
                    break;
                }
                let stage = this.stage.lock().map(|s| s.clone()).unwrap_or_default();
                let bd = this.bytes_done();
                let bt = this.bytes_total.load(Ordering::Relaxed);
                let pct = if bt > 0 { (bd as f64 / bt as f64) * 100.0 } else { 0.0 };
                tracing::info!(
                    elapsed_s = t0.elapsed().as_secs(),
                    chunks = this.chunks_done(),
                    chunks_total = this.chunks_total.load(Ordering::Relaxed),
                    "{} | {}%",
                    stage,
                    pct as i32
                );
            }
            this.reporters.fetch_sub(1, Ordering::SeqCst);
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
