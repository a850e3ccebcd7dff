//! Redis-backed coordination store.
//!
//! Ordinary commands share one `ConnectionManager`. `BLPOP` parks its
//! connection until an element arrives or the timeout elapses, so blocking
//! pops run on a separate pool of multiplexed connections; otherwise a
//! worker waiting on an empty queue would stall every lock command queued
//! behind it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncConnectionConfig;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::CoordinationStore;
use crate::error::{CoverError, Result};

/// Extra time the client waits for a BLPOP reply beyond the server-side timeout.
const BLOCKING_REPLY_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct RedisCoordinationStore {
    client: redis::Client,
    conn: ConnectionManager,
    blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
}

impl fmt::Debug for RedisCoordinationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCoordinationStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

fn millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry.
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl RedisCoordinationStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis coordination store");

        let client = redis::Client::open(redis_url).map_err(|e| {
            CoverError::Store(format!("Failed to create Redis client: {e}"))
        })?;

        let conn = ConnectionManager::new(client.clone()).await.map_err(|e| {
            CoverError::Store(format!("Failed to connect to Redis: {e}"))
        })?;

        info!("Successfully connected to Redis coordination store");

        Ok(Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(Vec::new())),
        })
    }

    async fn checkout_blocking(
        &self,
        timeout: Duration,
    ) -> Result<MultiplexedConnection> {
        if let Some(conn) = self.blocking.lock().await.pop() {
            return Ok(conn);
        }

        debug!("Opening dedicated Redis connection for blocking pops");
        let config = AsyncConnectionConfig::new()
            .set_response_timeout(Some(timeout + BLOCKING_REPLY_GRACE));
        let conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;
        Ok(conn)
    }

    async fn checkin_blocking(&self, conn: MultiplexedConnection) {
        self.blocking.lock().await.push(conn);
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn set_if_absent_many(
        &self,
        keys: &[String],
        ttl: Duration,
    ) -> Result<Vec<bool>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let ttl_ms = millis(ttl);
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("SET")
                .arg(key)
                .arg(1)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms);
        }

        let mut conn = self.conn.clone();
        let replies: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        if replies.len() != keys.len() {
            return Err(CoverError::Store(format!(
                "pipelined SET returned {} replies for {} keys",
                replies.len(),
                keys.len()
            )));
        }
        Ok(replies.into_iter().map(|reply| reply.is_some()).collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL").arg(keys).query_async(&mut conn).await?;
        Ok(())
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn push_tail(&self, list: &str, values: &[String]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(list)
            .arg(values)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_head_blocking(
        &self,
        list: &str,
        timeout: Duration,
    ) -> Result<Option<String>> {
        let mut conn = self.checkout_blocking(timeout).await?;
        // BLPOP treats 0 as "wait forever".
        let seconds = timeout.as_secs_f64().max(0.01);
        let reply: redis::RedisResult<Option<(String, String)>> =
            redis::cmd("BLPOP")
                .arg(list)
                .arg(seconds)
                .query_async(&mut conn)
                .await;

        match reply {
            Ok(popped) => {
                self.checkin_blocking(conn).await;
                Ok(popped.map(|(_, value)| value))
            }
            // The connection may be wedged; drop it instead of returning it.
            Err(err) => Err(err.into()),
        }
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN").arg(list).query_async(&mut conn).await?;
        Ok(len)
    }
}
