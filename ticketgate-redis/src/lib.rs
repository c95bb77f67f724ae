//! Redis counter backend for `ticketgate` (companion crate).
//! Bring your own `ConnectionManager`, or let [`connect_primary`] open one.
//!
//! Every operation is one Redis command (`PING`, `SETNX`, `DECR`, `INCR`,
//! `GET`), so admissions are serialized by Redis itself and several engine
//! instances can share one set of counters.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use ticketgate::{BackendError, CounterStore};

#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("conn", &"<redis::aio::ConnectionManager>")
            .finish()
    }
}

impl RedisCounterStore {
    /// Wrap an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a connection manager for `url` (e.g. `redis://127.0.0.1:6379`).
    ///
    /// # Errors
    /// Returns `Err` if the URL is invalid or the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

/// Connect to the primary counter backend at `addr`, if one is configured.
///
/// Returns `None` (after logging why) when `addr` is `None`, the connection
/// fails, or it takes longer than `timeout`; the quota allocator then runs
/// on in-process counters.
pub async fn connect_primary(
    addr: Option<&str>,
    timeout: Duration,
) -> Option<Arc<dyn CounterStore>> {
    let addr = addr?;
    let url = if addr.contains("://") { addr.to_string() } else { format!("redis://{addr}") };
    match tokio::time::timeout(timeout, RedisCounterStore::connect(&url)).await {
        Ok(Ok(store)) => Some(Arc::new(store)),
        Ok(Err(err)) => {
            tracing::warn!(target: "ticketgate::redis", addr = %addr, error = %err, "redis connection failed");
            None
        }
        Err(_) => {
            tracing::warn!(target: "ticketgate::redis", addr = %addr, ?timeout, "redis connection timed out");
            None
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn init(&self, key: &str, value: i64) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let created: bool = conn.set_nx(key, value).await?;
        Ok(created)
    }

    async fn decrement(&self, key: &str) -> Result<i64, BackendError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.decr(key, 1).await?;
        Ok(value)
    }

    async fn increment(&self, key: &str) -> Result<i64, BackendError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, BackendError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_address_means_no_primary() {
        assert!(connect_primary(None, Duration::from_millis(100)).await.is_none());
    }

    #[tokio::test]
    async fn bad_url_means_no_primary() {
        assert!(connect_primary(Some("notaredis://x"), Duration::from_millis(100)).await.is_none());
    }
}
