use crate::kv::{KvClient, KvSessionStore};
use async_trait::async_trait;
use kvsession_core::{SessionError, SessionResult, StoreConfig, REDIS_DEFAULT_PORT};
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;
use tracing::info;

/// Longest TTL sent with `EXPIRE`. Redis rejects expiries whose deadline in
/// milliseconds overflows a signed 64-bit integer.
const MAX_EXPIRE_SECS: u64 = (i64::MAX / 1000 / 2) as u64;

/// Clamps a TTL to what `EXPIRE` accepts.
fn expire_secs(ttl_secs: u64) -> u64 {
    ttl_secs.min(MAX_EXPIRE_SECS)
}

/// A session store backed by a Redis server.
pub type RedisStore = KvSessionStore<RedisKv>;

/// Redis client holding one multiplexed connection shared by every caller.
///
/// The connection is opened on first use when `autoconnect` is set;
/// otherwise [`RedisKv::connect`] must be awaited before any operation.
pub struct RedisKv {
    client: redis::Client,
    url: String,
    autoconnect: bool,
    conn: OnceCell<MultiplexedConnection>,
}

fn unavailable(url: &str, e: redis::RedisError) -> SessionError {
    SessionError::BackendUnavailable(format!("redis at {url}: {e}"))
}

impl RedisKv {
    /// Builds the client without touching the network.
    pub fn new(config: &StoreConfig) -> SessionResult<Self> {
        let url = format!(
            "redis://{}:{}/",
            config.host,
            config.port_or(REDIS_DEFAULT_PORT)
        );
        let client = redis::Client::open(url.as_str())
            .map_err(|e| SessionError::Config(format!("Invalid redis address {url}: {e}")))?;
        Ok(Self {
            client,
            url,
            autoconnect: config.autoconnect,
            conn: OnceCell::new(),
        })
    }

    /// Connection URL built from the config.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the shared connection is open.
    pub fn is_connected(&self) -> bool {
        self.conn.initialized()
    }

    /// Opens the shared connection if it is not open yet.
    pub async fn connect(&self) -> SessionResult<()> {
        self.open().await.map(|_| ())
    }

    async fn open(&self) -> SessionResult<MultiplexedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let conn = self
                    .client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| unavailable(&self.url, e))?;
                info!(url = %self.url, "Connected to redis");
                Ok::<_, SessionError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }

    async fn connection(&self) -> SessionResult<MultiplexedConnection> {
        if let Some(conn) = self.conn.get() {
            return Ok(conn.clone());
        }
        if !self.autoconnect {
            return Err(SessionError::BackendUnavailable(format!(
                "redis at {} is not connected",
                self.url
            )));
        }
        self.open().await
    }
}

#[async_trait]
impl KvClient for RedisKv {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable(&self.url, e))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> SessionResult<()> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("SET").arg(key).arg(value).ignore();
        if ttl_secs > 0 {
            pipe.cmd("EXPIRE").arg(key).arg(expire_secs(ttl_secs)).ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable(&self.url, e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable(&self.url, e))?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStore;

    #[test]
    fn url_uses_default_port() {
        let kv = RedisKv::new(&StoreConfig::default()).unwrap();
        assert_eq!(kv.url(), "redis://localhost:6379/");
        assert!(!kv.is_connected());
    }

    #[test]
    fn url_honours_host_and_port() {
        let cfg = StoreConfig::default().with_host("10.0.0.7").with_port(6390);
        let kv = RedisKv::new(&cfg).unwrap();
        assert_eq!(kv.url(), "redis://10.0.0.7:6390/");
    }

    #[test]
    fn oversized_ttl_is_clamped() {
        assert_eq!(expire_secs(60), 60);
        assert_eq!(expire_secs(u64::MAX), MAX_EXPIRE_SECS);
        let deadline_ms = i64::try_from(expire_secs(u64::MAX)).unwrap() * 1000;
        assert!(deadline_ms.checked_add(chrono::Utc::now().timestamp_millis()).is_some());
    }

    #[tokio::test]
    async fn without_autoconnect_operations_fail_until_connected() {
        let cfg = StoreConfig::default().with_autoconnect(false);
        let store = KvSessionStore::new("redis", RedisKv::new(&cfg).unwrap());
        let err = store.retrieve("abc").await.unwrap_err();
        assert!(matches!(err, SessionError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        // Nothing listens on port 1.
        let cfg = StoreConfig::default().with_host("127.0.0.1").with_port(1);
        let store = KvSessionStore::new("redis", RedisKv::new(&cfg).unwrap());
        let err = store.retrieve("abc").await.unwrap_err();
        assert!(err.is_transient());
    }
}
