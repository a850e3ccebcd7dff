//! Process lifecycle for the cover pipeline.
//!
//! One `CoverPipeline` is built at startup and handed to whatever needs to
//! enqueue covers or stop the process. Its background tasks share a single
//! cancellation token and are joined on shutdown.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backfill::BackfillScheduler;
use crate::config::PipelineConfig;
use crate::coordination::{LockManager, RetryCounter};
use crate::error::Result;
use crate::media::MediaGenerator;
use crate::processor::{CoverProcessor, JobProcessor};
use crate::queue::{CoverEnqueuer, WorkQueue};
use crate::records::VideoRecords;
use crate::store::CoordinationStore;
use crate::types::VideoId;
use crate::worker::{WorkerPool, WorkerStatsSnapshot};

/// Shortest time shutdown waits for each task before giving up on it.
const MIN_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct CoverPipeline {
    config: PipelineConfig,
    enqueuer: CoverEnqueuer,
    locks: LockManager,
    pool: WorkerPool,
    backfill: BackfillScheduler,
    shutdown_token: CancellationToken,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    scheduler_handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl fmt::Debug for CoverPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let worker_count = self
            .worker_handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("CoverPipeline")
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("workers", &worker_count)
            .field("pool", &self.pool)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl CoverPipeline {
    /// Wire the pipeline around an arbitrary job processor.
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn CoordinationStore>,
        records: Arc<dyn VideoRecords>,
        processor: Arc<dyn JobProcessor>,
    ) -> Result<Self> {
        config.validate()?;

        let keys = config.keys();
        let locks = LockManager::new(store.clone(), keys.clone(), config.lock.ttl());
        let retries = RetryCounter::new(store.clone(), keys.clone(), config.retry.counter_ttl());
        let queue = WorkQueue::new(store.clone(), &keys);
        let enqueuer = CoverEnqueuer::new(locks.clone(), queue.clone());
        let pool = WorkerPool::new(&config, queue, locks.clone(), retries, processor);
        let backfill =
            BackfillScheduler::new(config.backfill, store, &keys, records, enqueuer.clone());

        Ok(Self {
            config,
            enqueuer,
            locks,
            pool,
            backfill,
            shutdown_token: CancellationToken::new(),
            worker_handles: Mutex::new(Vec::new()),
            scheduler_handle: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Wire the pipeline with the standard fallback-chain processor.
    pub fn with_cover_processor(
        config: PipelineConfig,
        store: Arc<dyn CoordinationStore>,
        records: Arc<dyn VideoRecords>,
        generator: Arc<dyn MediaGenerator>,
    ) -> Result<Self> {
        let processor = CoverProcessor::new(&config, records.clone(), generator)?;
        Self::new(config, store, records, Arc::new(processor))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn enqueuer(&self) -> &CoverEnqueuer {
        &self.enqueuer
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn backfill(&self) -> &BackfillScheduler {
        &self.backfill
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.pool.stats()
    }

    /// Request a cover. See [`CoverEnqueuer::enqueue`].
    pub async fn enqueue(&self, video_id: &VideoId) -> bool {
        self.enqueuer.enqueue(video_id).await
    }

    pub async fn queue_depth(&self) -> Result<usize> {
        self.enqueuer.queue().len().await
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.shutdown_token.is_cancelled()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the worker pool and, when enabled, the backfill scheduler.
    /// Returns `false` if the pipeline was already started or has been shut
    /// down.
    pub async fn start(&self) -> bool {
        // Held until every handle is recorded so a concurrent `shutdown`
        // cannot drain the list in between.
        let mut workers = self.worker_handles.lock().await;
        let mut scheduler = self.scheduler_handle.lock().await;

        if self.shutdown_token.is_cancelled() {
            debug!("cover pipeline already shut down");
            return false;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("cover pipeline already started");
            return false;
        }

        workers.extend(self.pool.spawn(self.shutdown_token.clone()));
        if self.config.backfill.enabled {
            let backfill = self.backfill.clone();
            *scheduler = Some(tokio::spawn(backfill.run(self.shutdown_token.clone())));
        } else {
            info!("backfill scheduler disabled");
        }

        info!(
            workers = self.config.worker.concurrency,
            backfill = self.config.backfill.enabled,
            "cover pipeline started"
        );
        true
    }

    /// Tasks spawned by [`start`](Self::start) that have not been joined yet.
    pub async fn pending_tasks(&self) -> usize {
        let workers = self.worker_handles.lock().await.len();
        let scheduler = usize::from(self.scheduler_handle.lock().await.is_some());
        workers + scheduler
    }

    /// How long [`shutdown`](Self::shutdown) waits for each task: a worker
    /// may be blocked in a pop and then finishing a job that runs into every
    /// timeout.
    pub fn shutdown_grace(&self) -> Duration {
        self.config
            .job_time_budget()
            .and_then(|job| job.checked_add(self.config.worker.pop_timeout()))
            .map_or(MIN_SHUTDOWN_GRACE, |grace| grace.max(MIN_SHUTDOWN_GRACE))
    }

    /// Wait for the workers to stop on their own, which only happens once
    /// `worker.max_items` is reached. The backfill scheduler keeps running
    /// until [`shutdown`](Self::shutdown).
    pub async fn wait_for_workers(&self) {
        let handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Cover pipeline task failed: {:?}", e);
            }
        }
    }

    /// Cancel every task and wait for it to wind down. Workers finish the
    /// job in hand first, bounded by [`shutdown_grace`](Self::shutdown_grace);
    /// a task still running after that is detached and its video's lock
    /// expires on its own.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of cover pipeline");
        self.shutdown_token.cancel();

        let mut handles = {
            let mut guard = self.worker_handles.lock().await;
            std::mem::take(&mut *guard)
        };
        if let Some(scheduler) = self.scheduler_handle.lock().await.take() {
            handles.push(scheduler);
        }

        let grace = self.shutdown_grace();
        for handle in handles {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Cover pipeline task failed: {:?}", e),
                Err(_) => warn!(
                    grace_secs = grace.as_secs(),
                    "Cover pipeline task timed out during shutdown"
                ),
            }
        }

        info!("Cover pipeline stopped");
    }
}
