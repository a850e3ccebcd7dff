//! Process-local coordination store.
//!
//! Gives the same semantics as the Redis adapter inside a single process.
//! Used by tests and by dev mode; it provides no cross-process exclusion.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::CoordinationStore;
use crate::error::{CoverError, Result};

#[derive(Debug)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

#[derive(Debug, Default)]
struct State {
    keys: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
}

impl State {
    fn live_entry(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.keys.get(key).is_some_and(|entry| !entry.is_live(now)) {
            self.keys.remove(key);
        }
        self.keys.get_mut(key)
    }

    fn set_if_absent(&mut self, key: &str, ttl: Duration, now: Instant) -> bool {
        if self.live_entry(key, now).is_some() {
            return false;
        }
        self.keys.insert(
            key.to_string(),
            Entry {
                value: 1,
                expires_at: Some(now + ttl),
            },
        );
        true
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCoordinationStore {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
}

impl fmt::Debug for InMemoryCoordinationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("InMemoryCoordinationStore");
        if let Ok(state) = self.state.try_lock() {
            builder
                .field("keys", &state.keys.len())
                .field("lists", &state.lists.len());
        } else {
            builder.field("state", &"<locked>");
        }
        builder.finish()
    }
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a list, head first.
    pub async fn list_snapshot(&self, list: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .lists
            .get(list)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Current integer value of a live key.
    pub async fn value(&self, key: &str) -> Option<i64> {
        let mut state = self.state.lock().await;
        state.live_entry(key, Instant::now()).map(|entry| entry.value)
    }

    /// Remaining TTL of a live key.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state
            .live_entry(key, now)
            .and_then(|entry| entry.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    async fn try_pop(&self, list: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let items = state.lists.get_mut(list)?;
        let value = items.pop_front();
        if items.is_empty() {
            state.lists.remove(list);
        }
        value
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.set_if_absent(key, ttl, Instant::now()))
    }

    async fn set_if_absent_many(
        &self,
        keys: &[String],
        ttl: Duration,
    ) -> Result<Vec<bool>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        Ok(keys
            .iter()
            .map(|key| state.set_if_absent(key, ttl, now))
            .collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if let Some(entry) = state.live_entry(key, now) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.live_entry(key, Instant::now()).is_some())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        for key in keys {
            state.keys.remove(key);
            state.lists.remove(key);
        }
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let next = match state.live_entry(key, now) {
            Some(entry) => {
                entry.value = entry.value.checked_add(1).ok_or_else(|| {
                    CoverError::Store(format!("counter overflow for {key}"))
                })?;
                entry.expires_at = Some(now + ttl);
                entry.value
            }
            None => {
                state.keys.insert(
                    key.to_string(),
                    Entry {
                        value: 1,
                        expires_at: Some(now + ttl),
                    },
                );
                1
            }
        };
        Ok(next)
    }

    async fn push_tail(&self, list: &str, values: &[String]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.state.lock().await;
            state
                .lists
                .entry(list.to_string())
                .or_default()
                .extend(values.iter().cloned());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_head_blocking(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the wait still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(list).await {
                return Ok(Some(value));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.lists.get(list).map_or(0, VecDeque::len))
    }
}
