use std::{
    future::Future,
    sync::Arc,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use ::redis::{AsyncCommands as _, Client, aio::MultiplexedConnection};
use compose_env::{ContainerHandle, DynError, ServiceEntry};
use thiserror::Error;
use tokio::time::timeout;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error)]
pub enum RedisError {
    #[error("connecting to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("unexpected PING reply {0:?}")]
    UnexpectedPong(String),
    #[error(transparent)]
    Client(#[from] ::redis::RedisError),
}

/// Connection handed out by [`redis_service`]. Each handler run opens its
/// own, told apart by [`RedisConnection::id`].
#[derive(Clone)]
pub struct RedisConnection {
    id: u64,
    addr: String,
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl RedisConnection {
    pub async fn connect(host: &str, port: u16) -> Result<Self, RedisError> {
        let addr = format!("{host}:{port}");
        let client = Client::open(format!("redis://{addr}/"))?;
        let connection = timeout(CONNECT_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| RedisError::ConnectTimeout {
                addr: addr.clone(),
                timeout: CONNECT_TIMEOUT,
            })??;
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        debug!(addr, id, "connected to redis");

        Ok(Self {
            id,
            addr,
            connection,
        })
    }

    pub const fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn ping(&self) -> Result<(), RedisError> {
        let mut connection = self.connection.clone();
        let pong: String = bounded(::redis::cmd("PING").query_async(&mut connection)).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(RedisError::UnexpectedPong(pong))
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), RedisError> {
        let mut connection = self.connection.clone();
        bounded(connection.set::<_, _, ()>(key, value)).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, RedisError> {
        let mut connection = self.connection.clone();
        bounded(connection.get(key)).await
    }

    /// Returns how many of the keys existed.
    pub async fn del(&self, keys: &[&str]) -> Result<i64, RedisError> {
        let mut connection = self.connection.clone();
        bounded(connection.del(keys)).await
    }
}

async fn bounded<T>(
    request: impl Future<Output = ::redis::RedisResult<T>>,
) -> Result<T, RedisError> {
    Ok(timeout(REQUEST_TIMEOUT, request)
        .await
        .map_err(|_| RedisError::RequestTimeout(REQUEST_TIMEOUT))??)
}

/// Handler that connects to the container's single published port and
/// checks it answers `PING`.
pub async fn connect_redis(container: ContainerHandle) -> Result<Arc<RedisConnection>, DynError> {
    let (host, port) = container.endpoint()?;
    let connection = RedisConnection::connect(&host, port).await?;
    connection.ping().await?;
    Ok(Arc::new(connection))
}

pub fn redis_service(name: impl Into<String>) -> ServiceEntry<Arc<RedisConnection>> {
    ServiceEntry::new(name, connect_redis)
}
