//! Work queue and the enqueue entry point.
//!
//! The queue is a plain FIFO list of video ids in the coordination store.
//! What keeps it free of duplicates is the lock taken *before* an id is
//! pushed: a second enqueue for the same video sees the lock and backs off.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::coordination::LockManager;
use crate::error::Result;
use crate::keys::CoverKeys;
use crate::store::CoordinationStore;
use crate::types::VideoId;

#[derive(Clone)]
pub struct WorkQueue {
    store: Arc<dyn CoordinationStore>,
    list: String,
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue").field("list", &self.list).finish()
    }
}

impl WorkQueue {
    pub fn new(store: Arc<dyn CoordinationStore>, keys: &CoverKeys) -> Self {
        Self {
            store,
            list: keys.queue(),
        }
    }

    pub async fn push(&self, video_ids: &[VideoId]) -> Result<()> {
        let values: Vec<String> =
            video_ids.iter().map(|id| id.to_string()).collect();
        self.store.push_tail(&self.list, &values).await
    }

    /// Wait up to `timeout` for the next id. `Ok(None)` means the queue
    /// stayed empty, which lets callers check their stop condition.
    pub async fn pop(&self, timeout: Duration) -> Result<Option<VideoId>> {
        let popped = self.store.pop_head_blocking(&self.list, timeout).await?;
        Ok(popped.and_then(|raw| match VideoId::parse(&raw) {
            Some(id) => Some(id),
            None => {
                warn!(entry = %raw, "dropping malformed queue entry");
                None
            }
        }))
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.list_len(&self.list).await
    }
}

/// Public entry point for requesting covers.
///
/// The enqueuer does not look at the video record. Callers are expected to
/// check that the video has no cover yet before asking for one; the queue
/// only guarantees that a video is never queued twice at the same time.
#[derive(Clone, Debug)]
pub struct CoverEnqueuer {
    locks: LockManager,
    queue: WorkQueue,
}

impl CoverEnqueuer {
    pub fn new(locks: LockManager, queue: WorkQueue) -> Self {
        Self { locks, queue }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Claim the video and push it to the queue tail.
    ///
    /// Returns `false` if the video is already in flight or the store is
    /// unavailable. A failed push releases the claim so the video is not
    /// left locked with nothing queued.
    pub async fn enqueue(&self, video_id: &VideoId) -> bool {
        if !self.locks.acquire(video_id).await {
            debug!(video_id = %video_id, "cover job already in flight");
            return false;
        }

        if let Err(err) = self.queue.push(std::slice::from_ref(video_id)).await {
            warn!(video_id = %video_id, error = %err, "queue push failed; releasing lock");
            if let Err(release_err) = self.locks.release(video_id).await {
                warn!(video_id = %video_id, error = %release_err, "lock release after failed push also failed; TTL will clear it");
            }
            return false;
        }

        debug!(video_id = %video_id, "cover job queued");
        true
    }

    /// Batched [`enqueue`](Self::enqueue): one round trip to claim every id,
    /// one to push the claimed subset. Returns how many were queued.
    pub async fn enqueue_batch(&self, video_ids: &[VideoId]) -> usize {
        let mut seen = HashSet::with_capacity(video_ids.len());
        let unique: Vec<VideoId> = video_ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();
        if unique.is_empty() {
            return 0;
        }

        let acquired = self.locks.acquire_many(&unique).await;
        if acquired.is_empty() {
            debug!(requested = unique.len(), "no cover jobs claimed from batch");
            return 0;
        }

        if let Err(err) = self.queue.push(&acquired).await {
            warn!(claimed = acquired.len(), error = %err, "batch queue push failed; releasing claimed locks");
            if let Err(release_err) = self.locks.release_many(&acquired).await {
                warn!(claimed = acquired.len(), error = %release_err, "releasing batch locks failed; TTL will clear them");
            }
            return 0;
        }

        info!(
            requested = unique.len(),
            queued = acquired.len(),
            "cover jobs queued"
        );
        acquired.len()
    }
}
