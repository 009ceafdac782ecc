//! Redis cache backend.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tracing::debug;

use crate::cache::{BackendError, CacheBackend, mutex_lock};

use super::error::InfraError;

const SOURCE: &str = "infra::redis";

/// Resolver messages that identify a host-name lookup failure across
/// glibc, musl, macOS and Windows.
const NAME_RESOLUTION_MARKERS: &[&str] = &[
    "failed to lookup address",
    "name or service not known",
    "nodename nor servname",
    "temporary failure in name resolution",
    "no such host",
    "name does not resolve",
];

/// [`CacheBackend`] over a multiplexed Redis connection.
///
/// The `ConnectionManager` reconnects by itself after transport errors;
/// `close` drops it entirely so nothing keeps retrying during a DNS outage.
pub struct RedisBackend {
    client: Client,
    manager: Mutex<Option<ConnectionManager>>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("connected", &self.manager_handle().is_some())
            .finish()
    }
}

impl RedisBackend {
    /// Parse `url` without connecting.
    pub fn open(url: &str) -> Result<Self, InfraError> {
        let client = Client::open(url)
            .map_err(|err| InfraError::cache(format!("invalid Redis URL: {err}")))?;
        Ok(Self {
            client,
            manager: Mutex::new(None),
        })
    }

    fn manager_handle(&self) -> Option<ConnectionManager> {
        mutex_lock(&self.manager, SOURCE, "manager_handle").clone()
    }

    fn connection(&self) -> Result<ConnectionManager, BackendError> {
        self.manager_handle()
            .ok_or_else(|| BackendError::transport("redis: not connected"))
    }
}

/// Map a Redis error onto the degradation classes the store understands.
pub fn classify_redis_error(err: &RedisError) -> BackendError {
    let message = err.to_string();
    let lowered = message.to_ascii_lowercase();

    if NAME_RESOLUTION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        BackendError::name_resolution(message)
    } else if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        BackendError::transport(message)
    } else {
        BackendError::protocol(message)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn connect(&self) -> Result<(), BackendError> {
        // Plain attempt first: resolver errors surface here unretried.
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| classify_redis_error(&err))?;

        let manager = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|err| classify_redis_error(&err))?;
        *mutex_lock(&self.manager, SOURCE, "connect") = Some(manager);
        debug!("Redis connection manager established");
        Ok(())
    }

    async fn close(&self) {
        if mutex_lock(&self.manager, SOURCE, "close").take().is_some() {
            debug!("Redis connection manager dropped");
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let mut conn = self.connection()?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| classify_redis_error(&err))?;
        Ok(value.map(Bytes::from))
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(&value[..]);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|err| classify_redis_error(&err))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|err| classify_redis_error(&err))
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError> {
        let mut conn = self.connection()?;
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|err| classify_redis_error(&err))
    }
}
