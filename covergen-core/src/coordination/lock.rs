use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::keys::CoverKeys;
use crate::store::CoordinationStore;
use crate::types::VideoId;

/// TTL-bounded, cluster-wide claims keyed by video id.
///
/// A claim that is never released expires on its own; that expiry is how
/// the pipeline recovers from a crashed worker.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    keys: CoverKeys,
    ttl: Duration,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("namespace", &self.keys.namespace())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl LockManager {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: CoverKeys,
        ttl: Duration,
    ) -> Self {
        Self { store, keys, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Claim the video. Returns `false` when someone else holds it or when
    /// the store cannot be reached: an unreachable store must never be read
    /// as permission to process.
    pub async fn acquire(&self, video_id: &VideoId) -> bool {
        match self
            .store
            .set_if_absent(&self.keys.lock(video_id), self.ttl)
            .await
        {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(video_id = %video_id, error = %err, "lock acquire failed; treating as held");
                false
            }
        }
    }

    /// Claim many videos in one round trip. Returns the ids now owned by the
    /// caller, in input order. Store failures yield an empty set.
    pub async fn acquire_many(&self, video_ids: &[VideoId]) -> Vec<VideoId> {
        if video_ids.is_empty() {
            return Vec::new();
        }
        let keys: Vec<String> =
            video_ids.iter().map(|id| self.keys.lock(id)).collect();
        match self.store.set_if_absent_many(&keys, self.ttl).await {
            Ok(flags) => video_ids
                .iter()
                .zip(flags)
                .filter_map(|(id, acquired)| acquired.then(|| id.clone()))
                .collect(),
            Err(err) => {
                warn!(count = video_ids.len(), error = %err, "batch lock acquire failed; treating all as held");
                Vec::new()
            }
        }
    }

    /// Push the expiry out by a full TTL.
    ///
    /// Ownership is not checked: any caller can extend any lock by key. Only
    /// the worker holding the claim calls this, on a known schedule, so the
    /// race is tolerated rather than closed with a compare-and-set.
    pub async fn refresh(&self, video_id: &VideoId) -> Result<()> {
        debug!(video_id = %video_id, "refreshing cover lock");
        self.store.expire(&self.keys.lock(video_id), self.ttl).await
    }

    /// Delete the claim unconditionally.
    pub async fn release(&self, video_id: &VideoId) -> Result<()> {
        self.store.delete(&[self.keys.lock(video_id)]).await
    }

    pub async fn release_many(&self, video_ids: &[VideoId]) -> Result<()> {
        let keys: Vec<String> =
            video_ids.iter().map(|id| self.keys.lock(id)).collect();
        self.store.delete(&keys).await
    }

    pub async fn is_locked(&self, video_id: &VideoId) -> Result<bool> {
        self.store.exists(&self.keys.lock(video_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCoordinationStore;

    fn manager(store: &InMemoryCoordinationStore) -> LockManager {
        LockManager::new(
            Arc::new(store.clone()),
            CoverKeys::default(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let store = InMemoryCoordinationStore::new();
        let locks = manager(&store);
        let id = VideoId::new("v1");

        assert!(locks.acquire(&id).await);
        assert!(!locks.acquire(&id).await);
        assert!(locks.is_locked(&id).await.expect("exists"));

        locks.release(&id).await.expect("release");
        assert!(!locks.is_locked(&id).await.expect("exists"));
        assert!(locks.acquire(&id).await);
    }

    #[tokio::test]
    async fn refresh_extends_ttl() {
        tokio::time::pause();
        let store = InMemoryCoordinationStore::new();
        let locks = manager(&store);
        let id = VideoId::new("v1");
        assert!(locks.acquire(&id).await);

        tokio::time::advance(Duration::from_secs(20)).await;
        locks.refresh(&id).await.expect("refresh");
        tokio::time::advance(Duration::from_secs(20)).await;

        assert!(locks.is_locked(&id).await.expect("exists"));
        let remaining = store
            .ttl(&CoverKeys::default().lock(&id))
            .await
            .expect("live lock");
        assert_eq!(remaining, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn acquire_many_returns_only_new_claims() {
        let store = InMemoryCoordinationStore::new();
        let locks = manager(&store);
        let held = VideoId::new("held");
        assert!(locks.acquire(&held).await);

        let ids = vec![VideoId::new("a"), held.clone(), VideoId::new("b")];
        let acquired = locks.acquire_many(&ids).await;
        assert_eq!(acquired, vec![VideoId::new("a"), VideoId::new("b")]);
    }
}
