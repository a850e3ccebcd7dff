//! Coordination-store contract.
//!
//! The pipeline only needs a handful of atomic primitives from the shared
//! store. Every method is a single atomic command or one pipelined batch of
//! independent atomic commands; nothing here performs a read-modify-write
//! across a round trip.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryCoordinationStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCoordinationStore;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create `key` with `ttl` only if it does not exist. Returns whether it was created.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Batched [`set_if_absent`](Self::set_if_absent) in one round trip; one
    /// flag per key, in input order.
    async fn set_if_absent_many(
        &self,
        keys: &[String],
        ttl: Duration,
    ) -> Result<Vec<bool>>;

    /// Reset the TTL of an existing key. Missing keys are left alone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete every key in one round trip.
    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Increment an integer key and (re)set its TTL atomically. Returns the new value.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64>;

    /// Append values to the tail of a list in one command.
    async fn push_tail(&self, list: &str, values: &[String]) -> Result<()>;

    /// Pop the head of a list, waiting at most `timeout` for an element.
    async fn pop_head_blocking(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>>;

    async fn list_len(&self, list: &str) -> Result<usize>;
}
