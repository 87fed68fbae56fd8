use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pkg_constants::sync::{
    DEFAULT_BURST_SYNCS, DEFAULT_MIN_SYNC_PERIOD_SECS, DEFAULT_SYNC_PERIOD_SECS,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Work driven by the runner. Executions never overlap.
#[async_trait]
pub trait Runnable: Send + Sync {
    async fn run(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    /// Token refill period; the steady-state gap between runs.
    pub min_interval: Duration,
    /// A run is forced after this long without one.
    pub max_interval: Duration,
    /// Token bucket size.
    pub burst: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(DEFAULT_MIN_SYNC_PERIOD_SECS),
            max_interval: Duration::from_secs(DEFAULT_SYNC_PERIOD_SECS),
            burst: DEFAULT_BURST_SYNCS,
        }
    }
}

struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_every: Duration,
    last: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_every,
            last: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        let period = self.refill_every.as_secs_f64();
        if period > 0.0 {
            self.tokens = (self.tokens + elapsed / period).min(self.capacity);
        } else {
            self.tokens = self.capacity;
        }
        self.last = now;
    }

    /// Time until a whole token is available.
    fn wait_time(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            self.refill_every.mul_f64(1.0 - self.tokens)
        }
    }

    fn take(&mut self) {
        self.tokens -= 1.0;
    }
}

/// Runs a task when kicked, at most `burst` times back to back and no
/// faster than one run per `min_interval` after that. Kicks that arrive
/// while a run is in flight collapse into a single follow-up run.
pub struct BoundedFrequencyRunner {
    name: String,
    config: RunnerConfig,
    pending: AtomicBool,
    notify: Notify,
}

impl BoundedFrequencyRunner {
    pub fn new(name: impl Into<String>, config: RunnerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config: RunnerConfig {
                burst: config.burst.max(1),
                ..config
            },
            pending: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    /// Ask for a run. Never blocks.
    pub fn kick(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Start the loop as a background task. The periodic run starts after
    /// the first kick. On cancel, an in-flight run completes first.
    pub fn start(
        self: Arc<Self>,
        task: Arc<dyn Runnable>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "{} started (min={}s, max={}s, burst={})",
                self.name,
                self.config.min_interval.as_secs_f64(),
                self.config.max_interval.as_secs_f64(),
                self.config.burst
            );
            let mut bucket = TokenBucket::new(self.config.burst, self.config.min_interval);
            let mut last_run: Option<Instant> = None;

            loop {
                if !self.pending.load(Ordering::Acquire) {
                    match last_run {
                        Some(at) => {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = self.notify.notified() => {}
                                _ = tokio::time::sleep_until(at + self.config.max_interval) => {
                                    debug!("{}: periodic run", self.name);
                                    self.pending.store(true, Ordering::Release);
                                }
                            }
                        }
                        None => {
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = self.notify.notified() => {}
                            }
                        }
                    }
                    continue;
                }

                let wait = bucket.wait_time();
                if !wait.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                    continue;
                }

                bucket.take();
                self.pending.store(false, Ordering::Release);
                task.run().await;
                last_run = Some(Instant::now());
            }
            info!("{} stopped", self.name);
        })
    }
}
