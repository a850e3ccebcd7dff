//! Periodic self-healing scan.
//!
//! Every process runs the timer, but a tick only scans after winning the
//! cluster-wide backfill lock. The lock is left to expire rather than
//! released, which limits the scan to one process per lock TTL.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BackfillConfig;
use crate::error::Result;
use crate::keys::CoverKeys;
use crate::queue::CoverEnqueuer;
use crate::records::VideoRecords;
use crate::store::CoordinationStore;

/// Result of one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Another process holds the backfill lock; nothing was scanned.
    pub skipped: bool,
    /// Videos returned by the missing-cover query.
    pub found: usize,
    /// Videos newly queued (the rest were already in flight).
    pub queued: usize,
}

#[derive(Clone)]
pub struct BackfillScheduler {
    config: BackfillConfig,
    store: Arc<dyn CoordinationStore>,
    lock_key: String,
    records: Arc<dyn VideoRecords>,
    enqueuer: CoverEnqueuer,
}

impl fmt::Debug for BackfillScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackfillScheduler")
            .field("config", &self.config)
            .field("lock_key", &self.lock_key)
            .finish()
    }
}

impl BackfillScheduler {
    pub fn new(
        config: BackfillConfig,
        store: Arc<dyn CoordinationStore>,
        keys: &CoverKeys,
        records: Arc<dyn VideoRecords>,
        enqueuer: CoverEnqueuer,
    ) -> Self {
        Self {
            config,
            store,
            lock_key: keys.backfill_lock(),
            records,
            enqueuer,
        }
    }

    /// One guarded scan. Fails closed: if the lock cannot be taken for any
    /// reason, the tick does nothing.
    pub async fn run_once(&self) -> Result<BackfillReport> {
        let acquired = match self
            .store
            .set_if_absent(&self.lock_key, self.config.lock_ttl())
            .await
        {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(error = %err, "backfill lock unavailable; skipping tick");
                false
            }
        };
        if !acquired {
            debug!("backfill already ran elsewhere this interval");
            return Ok(BackfillReport {
                skipped: true,
                ..BackfillReport::default()
            });
        }

        let missing = self
            .records
            .find_videos_missing_cover(self.config.batch_size)
            .await?;
        let found = missing.len();
        let queued = if missing.is_empty() {
            0
        } else {
            self.enqueuer.enqueue_batch(&missing).await
        };

        info!(found, queued, "backfill pass complete");
        Ok(BackfillReport {
            skipped: false,
            found,
            queued,
        })
    }

    /// Tick until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            "backfill scheduler started"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("backfill scheduler stopped");
                return;
            }
            _ = tokio::time::sleep(self.config.initial_delay()) => {}
        }

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        warn!(error = %err, "backfill pass failed");
                    }
                }
            }
        }

        info!("backfill scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::coordination::LockManager;
    use crate::queue::WorkQueue;
    use crate::records::MockVideoRecords;
    use crate::store::InMemoryCoordinationStore;
    use crate::types::VideoId;

    fn scheduler(
        store: &InMemoryCoordinationStore,
        records: MockVideoRecords,
    ) -> BackfillScheduler {
        let keys = CoverKeys::default();
        let shared: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let enqueuer = CoverEnqueuer::new(
            LockManager::new(shared.clone(), keys.clone(), Duration::from_secs(60)),
            WorkQueue::new(shared.clone(), &keys),
        );
        BackfillScheduler::new(
            BackfillConfig::default(),
            shared,
            &keys,
            Arc::new(records),
            enqueuer,
        )
    }

    #[tokio::test]
    async fn held_lock_means_no_query() {
        let store = InMemoryCoordinationStore::new();
        store
            .set_if_absent(&CoverKeys::default().backfill_lock(), Duration::from_secs(60))
            .await
            .expect("hold lock");

        let mut records = MockVideoRecords::new();
        records.expect_find_videos_missing_cover().times(0);

        let report = scheduler(&store, records).run_once().await.expect("tick");
        assert!(report.skipped);
        assert_eq!(report.queued, 0);
    }

    #[tokio::test]
    async fn winning_tick_queues_missing_videos() {
        let store = InMemoryCoordinationStore::new();
        let mut records = MockVideoRecords::new();
        records
            .expect_find_videos_missing_cover()
            .withf(|limit| *limit == BackfillConfig::default().batch_size)
            .times(1)
            .returning(|_| Ok(vec![VideoId::new("a"), VideoId::new("b")]));

        let report = scheduler(&store, records).run_once().await.expect("tick");
        assert_eq!(
            report,
            BackfillReport {
                skipped: false,
                found: 2,
                queued: 2
            }
        );
        assert_eq!(
            store.list_snapshot(&CoverKeys::default().queue()).await,
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[tokio::test]
    async fn second_tick_in_same_interval_is_a_no_op() {
        let store = InMemoryCoordinationStore::new();
        let mut records = MockVideoRecords::new();
        records
            .expect_find_videos_missing_cover()
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let scheduler = scheduler(&store, records);
        assert!(!scheduler.run_once().await.expect("first").skipped);
        assert!(scheduler.run_once().await.expect("second").skipped);
    }
}
