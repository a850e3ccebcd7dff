//! Fixed-size pool of queue consumers.
//!
//! Each worker loops: blocking pop, refresh the claim, run the processor,
//! then either clear the video's state, re-queue it, or give up on it. The
//! store's atomic pop hands every queue entry to exactly one worker, so the
//! pool needs no in-process locking of its own.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{PipelineConfig, RetryConfig, WorkerConfig};
use crate::coordination::{LockManager, RetryCounter};
use crate::error::{CoverError, Result};
use crate::processor::{CoverOutcome, JobProcessor};
use crate::queue::WorkQueue;
use crate::types::VideoId;

/// Running totals for one pool.
#[derive(Debug, Default)]
pub struct WorkerStats {
    claimed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub claimed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub abandoned: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            claimed: self.claimed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

struct PoolShared {
    worker: WorkerConfig,
    retry: RetryConfig,
    lock_refresh: Duration,
    queue: WorkQueue,
    locks: LockManager,
    retries: RetryCounter,
    processor: Arc<dyn JobProcessor>,
    stats: WorkerStats,
    /// Items taken against `worker.max_items`.
    reserved: AtomicU64,
}

impl PoolShared {
    /// Take a slot against the item limit, if there is one.
    fn try_reserve(&self) -> bool {
        match self.worker.max_items {
            None => true,
            Some(max) => self
                .reserved
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < max).then_some(n + 1)
                })
                .is_ok(),
        }
    }

    fn unreserve(&self) {
        if self.worker.max_items.is_some() {
            self.reserved.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.shared.worker.concurrency)
            .field("max_retries", &self.shared.retry.max_retries)
            .field("stats", &self.shared.stats.snapshot())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        config: &PipelineConfig,
        queue: WorkQueue,
        locks: LockManager,
        retries: RetryCounter,
        processor: Arc<dyn JobProcessor>,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                worker: config.worker.clone(),
                retry: config.retry,
                lock_refresh: config.lock.refresh_interval(),
                queue,
                locks,
                retries,
                processor,
                stats: WorkerStats::default(),
                reserved: AtomicU64::new(0),
            }),
        }
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Start `concurrency` workers. They exit when `shutdown` fires or when
    /// the item limit is reached.
    pub fn spawn(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let group = format!("cover-{}", std::process::id());
        (0..self.shared.worker.concurrency.max(1))
            .map(|i| {
                let worker = Worker {
                    id: format!("{group}-w{i}"),
                    shared: Arc::clone(&self.shared),
                    shutdown: shutdown.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

struct Worker {
    id: String,
    shared: Arc<PoolShared>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        info!(worker = %self.id, "cover worker started");
        let mut backoff = ErrorBackoff::new(
            self.shared.worker.error_backoff_base(),
            self.shared.worker.error_backoff_max(),
        );

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if !self.shared.try_reserve() {
                debug!(worker = %self.id, "item limit reached");
                break;
            }

            // Not raced against shutdown: dropping an in-flight pop could lose
            // an entry the store already handed to us. The pop timeout bounds
            // how long shutdown waits.
            match self.shared.queue.pop(self.shared.worker.pop_timeout()).await {
                Ok(Some(video_id)) => {
                    backoff.recovered(&self.id);
                    self.shared.stats.claimed.fetch_add(1, Ordering::Relaxed);
                    self.handle(&video_id).await;
                }
                Ok(None) => {
                    self.shared.unreserve();
                    backoff.recovered(&self.id);
                    trace!(worker = %self.id, "queue empty");
                }
                Err(err) => {
                    self.shared.unreserve();
                    let delay = backoff.on_error(&self.id, &err);
                    if self.sleep_or_shutdown(delay).await {
                        break;
                    }
                }
            }
        }

        info!(worker = %self.id, "cover worker stopped");
    }

    /// Returns `true` if shutdown fired first.
    async fn sleep_or_shutdown(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    async fn handle(&self, video_id: &VideoId) {
        if let Err(err) = self.shared.locks.refresh(video_id).await {
            debug!(worker = %self.id, video_id = %video_id, error = %err, "lock refresh failed");
        }

        match self.process_with_refresh(video_id).await {
            Ok(outcome) => self.succeeded(video_id, outcome).await,
            Err(err) => self.failed(video_id, err).await,
        }
    }

    /// Run the processor, re-extending the lock on a fixed cadence until it
    /// returns. A panicking processor counts as a failed attempt.
    async fn process_with_refresh(&self, video_id: &VideoId) -> Result<CoverOutcome> {
        let work = AssertUnwindSafe(self.shared.processor.process(video_id)).catch_unwind();
        tokio::pin!(work);

        let period = self.shared.lock_refresh.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut work => {
                    return result.unwrap_or_else(|_| {
                        Err(CoverError::Internal("cover processor panicked".into()))
                    });
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.shared.locks.refresh(video_id).await {
                        debug!(worker = %self.id, video_id = %video_id, error = %err, "lock refresh failed");
                    }
                }
            }
        }
    }

    async fn succeeded(&self, video_id: &VideoId, outcome: CoverOutcome) {
        self.shared.stats.succeeded.fetch_add(1, Ordering::Relaxed);
        debug!(worker = %self.id, video_id = %video_id, ?outcome, "cover job finished");
        if let Err(err) = self.shared.retries.reset_and_release(video_id).await {
            warn!(worker = %self.id, video_id = %video_id, error = %err, "clearing job state failed; it will expire");
        }
    }

    async fn failed(&self, video_id: &VideoId, cause: CoverError) {
        let attempts = match self.shared.retries.increment(video_id).await {
            Ok(count) => count,
            Err(err) => {
                // Without a count we cannot tell retry from abandon. The lock
                // expires and backfill picks the video up again.
                warn!(worker = %self.id, video_id = %video_id, error = %err, cause = %cause, "could not record failure");
                return;
            }
        };

        let max_retries = u64::from(self.shared.retry.max_retries);
        if attempts <= max_retries {
            self.shared.stats.retried.fetch_add(1, Ordering::Relaxed);
            info!(
                worker = %self.id,
                video_id = %video_id,
                attempt = attempts,
                max_retries,
                error = %cause,
                "cover job failed; retrying"
            );
            // On shutdown, re-queue immediately rather than dropping the entry.
            self.sleep_or_shutdown(self.shared.retry.retry_delay()).await;

            if let Err(err) = self.shared.queue.push(std::slice::from_ref(video_id)).await {
                warn!(worker = %self.id, video_id = %video_id, error = %err, "re-queue failed; releasing lock");
                if let Err(err) = self.shared.locks.release(video_id).await {
                    debug!(worker = %self.id, video_id = %video_id, error = %err, "lock release failed");
                }
            }
        } else {
            self.shared.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            warn!(
                worker = %self.id,
                video_id = %video_id,
                attempts,
                error = %cause,
                "cover job abandoned after exhausting retries"
            );
            if let Err(err) = self.shared.retries.reset_and_release(video_id).await {
                warn!(worker = %self.id, video_id = %video_id, error = %err, "clearing job state failed; it will expire");
            }
        }
    }
}

/// Capped exponential backoff for store connectivity errors. Logs the first
/// occurrence of each distinct error and counts the repeats.
#[derive(Debug)]
struct ErrorBackoff {
    base: Duration,
    max: Duration,
    current: Option<Duration>,
    last_error: Option<String>,
    suppressed: u64,
}

impl ErrorBackoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: None,
            last_error: None,
            suppressed: 0,
        }
    }

    fn on_error(&mut self, worker: &str, err: &CoverError) -> Duration {
        let message = err.to_string();
        if self.last_error.as_deref() == Some(message.as_str()) {
            self.suppressed += 1;
        } else {
            warn!(worker, error = %message, suppressed = self.suppressed, "queue pop failed; backing off");
            self.last_error = Some(message);
            self.suppressed = 0;
        }

        let next = match self.current {
            None => self.base,
            Some(previous) => (previous * 2).min(self.max),
        };
        self.current = Some(next);
        next + jitter(next)
    }

    fn recovered(&mut self, worker: &str) {
        if self.last_error.take().is_some() {
            info!(worker, suppressed = self.suppressed, "queue connection recovered");
        }
        self.current = None;
        self.suppressed = 0;
    }
}

/// Up to 10% extra so workers across processes do not retry in lockstep.
fn jitter(delay: Duration) -> Duration {
    let cap = (delay.as_millis() / 10) as u64;
    if cap == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = ErrorBackoff::new(Duration::from_millis(100), Duration::from_millis(350));
        let err = CoverError::Store("connection refused".into());

        let delays: Vec<Duration> = (0..4).map(|_| backoff.on_error("w", &err)).collect();
        let bounds = [(100, 110), (200, 220), (350, 385), (350, 385)];
        for (delay, (lo, hi)) in delays.iter().zip(bounds) {
            assert!(
                *delay >= Duration::from_millis(lo) && *delay <= Duration::from_millis(hi),
                "{delay:?} not in {lo}..={hi}ms"
            );
        }
    }

    #[test]
    fn repeated_errors_are_counted_not_logged() {
        let mut backoff = ErrorBackoff::new(Duration::from_millis(10), Duration::from_millis(100));
        let err = CoverError::Store("connection refused".into());
        backoff.on_error("w", &err);
        backoff.on_error("w", &err);
        backoff.on_error("w", &err);
        assert_eq!(backoff.suppressed, 2);

        let other = CoverError::Store("timed out".into());
        backoff.on_error("w", &other);
        assert_eq!(backoff.suppressed, 0);
        assert_eq!(backoff.last_error.as_deref(), Some(other.to_string().as_str()));
    }

    #[test]
    fn recovery_resets_delay() {
        let mut backoff = ErrorBackoff::new(Duration::from_millis(100), Duration::from_secs(10));
        let err = CoverError::Store("down".into());
        backoff.on_error("w", &err);
        backoff.on_error("w", &err);
        backoff.recovered("w");
        assert!(backoff.last_error.is_none());
        let delay = backoff.on_error("w", &err);
        assert!(delay < Duration::from_millis(111));
    }
}
