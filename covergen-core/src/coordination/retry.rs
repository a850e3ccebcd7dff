use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::keys::CoverKeys;
use crate::store::CoordinationStore;
use crate::types::VideoId;

/// Failure count for the current episode of a video's job.
///
/// The counter expires after `ttl` so a failure long ago does not count
/// against a fresh attempt.
#[derive(Clone)]
pub struct RetryCounter {
    store: Arc<dyn CoordinationStore>,
    keys: CoverKeys,
    ttl: Duration,
}

impl fmt::Debug for RetryCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCounter")
            .field("namespace", &self.keys.namespace())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl RetryCounter {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: CoverKeys,
        ttl: Duration,
    ) -> Self {
        Self { store, keys, ttl }
    }

    /// Bump the counter and its TTL in one round trip; returns the new count.
    pub async fn increment(&self, video_id: &VideoId) -> Result<u64> {
        let count = self
            .store
            .incr_with_ttl(&self.keys.retry_count(video_id), self.ttl)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn reset(&self, video_id: &VideoId) -> Result<()> {
        self.store.delete(&[self.keys.retry_count(video_id)]).await
    }

    /// Delete the counter and the lock together, ending the episode in one
    /// round trip.
    pub async fn reset_and_release(&self, video_id: &VideoId) -> Result<()> {
        self.store
            .delete(&[
                self.keys.retry_count(video_id),
                self.keys.lock(video_id),
            ])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCoordinationStore;

    #[tokio::test]
    async fn increments_then_resets() {
        let store = InMemoryCoordinationStore::new();
        let counter = RetryCounter::new(
            Arc::new(store.clone()),
            CoverKeys::default(),
            Duration::from_secs(60),
        );
        let id = VideoId::new("v9");

        assert_eq!(counter.increment(&id).await.expect("incr"), 1);
        assert_eq!(counter.increment(&id).await.expect("incr"), 2);
        counter.reset(&id).await.expect("reset");
        assert_eq!(counter.increment(&id).await.expect("incr"), 1);
    }

    #[tokio::test]
    async fn reset_and_release_clears_both_keys() {
        let store = InMemoryCoordinationStore::new();
        let shared: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let keys = CoverKeys::default();
        let id = VideoId::new("v9");
        let counter =
            RetryCounter::new(shared.clone(), keys.clone(), Duration::from_secs(60));

        shared
            .set_if_absent(&keys.lock(&id), Duration::from_secs(60))
            .await
            .expect("lock");
        counter.increment(&id).await.expect("incr");
        counter.reset_and_release(&id).await.expect("clear");

        assert!(store.value(&keys.lock(&id)).await.is_none());
        assert!(store.value(&keys.retry_count(&id)).await.is_none());
    }
}
