//! Coordination-store key layout.
//!
//! Every key lives under one namespace so several deployments can share a
//! Redis instance. Locks and retry counters are derived from the video id;
//! the backfill lock sits in its own `scheduler` segment so it can never
//! collide with a per-video lock.

use crate::types::VideoId;

pub const DEFAULT_NAMESPACE: &str = "covers";

#[derive(Clone, Debug)]
pub struct CoverKeys {
    namespace: String,
}

impl Default for CoverKeys {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl CoverKeys {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let namespace = namespace.trim_end_matches(':').to_string();
        Self { namespace }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn lock(&self, video_id: &VideoId) -> String {
        format!("{}:lock:{}", self.namespace, video_id)
    }

    pub fn retry_count(&self, video_id: &VideoId) -> String {
        format!("{}:retryCount:{}", self.namespace, video_id)
    }

    pub fn queue(&self) -> String {
        format!("{}:queue", self.namespace)
    }

    pub fn backfill_lock(&self) -> String {
        format!("{}:scheduler:backfill", self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_follow_layout() {
        let keys = CoverKeys::new("covers:");
        let id = VideoId::new("abc");
        assert_eq!(keys.lock(&id), "covers:lock:abc");
        assert_eq!(keys.retry_count(&id), "covers:retryCount:abc");
        assert_eq!(keys.queue(), "covers:queue");
        assert_eq!(keys.backfill_lock(), "covers:scheduler:backfill");
    }

    #[test]
    fn backfill_lock_never_matches_a_video_lock() {
        let keys = CoverKeys::default();
        let sneaky = VideoId::new("backfill");
        assert_ne!(keys.lock(&sneaky), keys.backfill_lock());
    }
}
