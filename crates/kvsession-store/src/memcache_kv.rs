//! Memcache backend on the `memcache` client crate.
//!
//! The client is blocking, so every command runs on tokio's blocking pool
//! against one of the client's pooled connections. Dropping the caller's
//! future does not interrupt a command: it runs to completion and its reply
//! is consumed before the connection goes back to the pool.

use crate::kv::{KvClient, KvSessionStore};
use async_trait::async_trait;
use chrono::Utc;
use kvsession_core::{SessionError, SessionResult, StoreConfig, MEMCACHE_DEFAULT_PORT};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// A session store backed by one or more memcache servers.
pub type MemcacheStore = KvSessionStore<MemcacheKv>;

/// Longest key memcache accepts.
const MAX_KEY_LEN: usize = 250;

/// Relative expiries above this are read by memcache as unix timestamps.
const MAX_RELATIVE_EXPIRY: u64 = 60 * 60 * 24 * 30;

/// Memcache client spreading keys over the configured servers.
///
/// The client is built on first use when `autoconnect` is set; otherwise
/// [`MemcacheKv::connect`] must be awaited before any operation.
pub struct MemcacheKv {
    urls: Vec<String>,
    autoconnect: bool,
    client: OnceCell<Arc<memcache::Client>>,
}

impl MemcacheKv {
    /// Builds the server list without touching the network.
    pub fn new(config: &StoreConfig) -> Self {
        let urls = config
            .server_addrs(MEMCACHE_DEFAULT_PORT)
            .into_iter()
            .map(|addr| format!("memcache://{addr}?protocol=ascii"))
            .collect();
        Self {
            urls,
            autoconnect: config.autoconnect,
            client: OnceCell::new(),
        }
    }

    /// One `memcache://` URL per configured server.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Whether the client has been built.
    pub fn is_connected(&self) -> bool {
        self.client.initialized()
    }

    /// Builds the client if it does not exist yet.
    pub async fn connect(&self) -> SessionResult<()> {
        self.open().await.map(|_| ())
    }

    async fn open(&self) -> SessionResult<Arc<memcache::Client>> {
        let client = self
            .client
            .get_or_try_init(|| async {
                let urls = self.urls.clone();
                let client = tokio::task::spawn_blocking(move || {
                    memcache::Client::connect(urls).map_err(|e| e.to_string())
                })
                .await
                .map_err(|e| self.unavailable(e))?
                .map_err(|e| self.unavailable(e))?;
                info!(servers = ?self.urls, "Connected to memcache");
                Ok::<_, SessionError>(Arc::new(client))
            })
            .await?;
        Ok(client.clone())
    }

    async fn connection(&self) -> SessionResult<Arc<memcache::Client>> {
        if let Some(client) = self.client.get() {
            return Ok(client.clone());
        }
        if !self.autoconnect {
            return Err(SessionError::BackendUnavailable(format!(
                "memcache at {} is not connected",
                self.urls.join(",")
            )));
        }
        self.open().await
    }

    /// Runs one blocking command on the blocking pool.
    async fn run<T, F>(&self, op: F) -> SessionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&memcache::Client) -> Result<T, memcache::MemcacheError> + Send + 'static,
    {
        let client = self.connection().await?;
        tokio::task::spawn_blocking(move || op(client.as_ref()).map_err(|e| e.to_string()))
            .await
            .map_err(|e| self.unavailable(e))?
            .map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, e: impl Display) -> SessionError {
        SessionError::BackendUnavailable(format!("memcache at {}: {e}", self.urls.join(",")))
    }
}

/// Memcache keys are at most 250 bytes with no whitespace or control bytes.
fn check_key(key: &str) -> SessionResult<()> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(SessionError::InvalidSessionId(key.to_string()));
    }
    Ok(())
}

/// Converts a TTL into the exptime memcache expects, saturating at the
/// largest timestamp the protocol can carry.
fn exptime(ttl_secs: u64) -> u32 {
    let secs = if ttl_secs > MAX_RELATIVE_EXPIRY {
        u64::try_from(Utc::now().timestamp())
            .unwrap_or(0)
            .saturating_add(ttl_secs)
    } else {
        ttl_secs
    };
    u32::try_from(secs).unwrap_or(u32::MAX)
}

#[async_trait]
impl KvClient for MemcacheKv {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        check_key(key)?;
        let key = key.to_string();
        self.run(move |client| {
            // Values returned under any other key are ignored.
            let mut found: HashMap<String, Vec<u8>> = client.gets(&[key.as_str()])?;
            Ok(found.remove(&key))
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> SessionResult<()> {
        check_key(key)?;
        let key = key.to_string();
        let value = value.to_vec();
        let exptime = exptime(ttl_secs);
        self.run(move |client| client.set(&key, value.as_slice(), exptime))
            .await
    }

    async fn delete(&self, key: &str) -> SessionResult<bool> {
        check_key(key)?;
        let key = key.to_string();
        self.run(move |client| client.delete(&key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SessionStore;
    use kvsession_core::SessionData;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::Mutex;

    type Shared = Arc<Mutex<HashMap<String, Vec<u8>>>>;

    /// How the stand-in server misbehaves.
    #[derive(Clone, Copy, Default)]
    struct Quirks {
        /// Reads of this key are answered only after a delay.
        slow_key: Option<&'static str>,
        /// Every read is answered with the value stored under this key.
        answer_as: Option<&'static str>,
    }

    /// Memcache stand-in speaking the ASCII commands the client sends.
    async fn fake_server(quirks: Quirks) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let data: Shared = Arc::default();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve(socket, data.clone(), quirks));
            }
        });
        port
    }

    async fn serve(socket: TcpStream, data: Shared, quirks: Quirks) {
        let mut stream = BufReader::new(socket);
        loop {
            let mut line = String::new();
            if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
                break;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            let reply = match parts.as_slice() {
                ["version"] => b"VERSION 1.6.21\r\n".to_vec(),
                [cmd @ ("get" | "gets"), keys @ ..] => {
                    let mut out = Vec::new();
                    for key in keys {
                        if quirks.slow_key == Some(*key) {
                            tokio::time::sleep(Duration::from_millis(300)).await;
                        }
                        let name = match quirks.answer_as {
                            Some(name) => name,
                            None => *key,
                        };
                        let Some(value) = data.lock().await.get(name).cloned() else {
                            continue;
                        };
                        let cas = if *cmd == "gets" { " 1" } else { "" };
                        out.extend(format!("VALUE {name} 0 {}{cas}\r\n", value.len()).into_bytes());
                        out.extend(value);
                        out.extend(b"\r\n");
                    }
                    out.extend(b"END\r\n");
                    out
                }
                ["set", key, _flags, _exp, len, ..] => {
                    let len: usize = len.parse().unwrap();
                    let mut buf = vec![0u8; len + 2];
                    stream.read_exact(&mut buf).await.unwrap();
                    buf.truncate(len);
                    data.lock().await.insert(key.to_string(), buf);
                    b"STORED\r\n".to_vec()
                }
                ["delete", key, ..] => {
                    if data.lock().await.remove(*key).is_some() {
                        b"DELETED\r\n".to_vec()
                    } else {
                        b"NOT_FOUND\r\n".to_vec()
                    }
                }
                _ => b"ERROR\r\n".to_vec(),
            };
            if stream.get_mut().write_all(&reply).await.is_err() {
                break;
            }
        }
    }

    fn local(port: u16) -> StoreConfig {
        StoreConfig::default().with_host("127.0.0.1").with_port(port)
    }

    #[test]
    fn urls_cover_every_server() {
        let kv = MemcacheKv::new(&StoreConfig::default());
        assert_eq!(kv.urls(), ["memcache://localhost:11211?protocol=ascii"]);
        assert!(!kv.is_connected());

        let cfg = StoreConfig::default().with_servers(["mc1", "mc2:11300"]);
        let kv = MemcacheKv::new(&cfg);
        assert_eq!(
            kv.urls(),
            [
                "memcache://mc1:11211?protocol=ascii",
                "memcache://mc2:11300?protocol=ascii"
            ]
        );
    }

    #[test]
    fn long_ttl_becomes_absolute() {
        assert_eq!(exptime(0), 0);
        assert_eq!(exptime(3600), 3600);
        let now = Utc::now().timestamp() as u64;
        assert!(u64::from(exptime(MAX_RELATIVE_EXPIRY + 1)) > now);
    }

    #[test]
    fn huge_ttl_saturates() {
        assert_eq!(exptime(u64::MAX), u32::MAX);
        assert_eq!(exptime(u64::from(u32::MAX) + 1), u32::MAX);
    }

    #[test]
    fn keys_with_spaces_are_rejected() {
        assert!(check_key("abc_DEF-123").is_ok());
        assert!(matches!(
            check_key("has space"),
            Err(SessionError::InvalidSessionId(_))
        ));
        assert!(check_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
        assert!(check_key("").is_err());
    }

    #[tokio::test]
    async fn store_round_trip_against_server() {
        let port = fake_server(Quirks::default()).await;
        let store = KvSessionStore::new("memcache", MemcacheKv::new(&local(port)));

        let mut data = SessionData::new();
        data.insert("user".into(), json!("ada"));
        store.store("s1", &data, 120).await.unwrap();
        assert_eq!(store.retrieve("s1").await.unwrap(), data);

        store.store("s1", &data, u64::MAX).await.unwrap();
        assert_eq!(store.retrieve("s1").await.unwrap(), data);

        store.store("s1", &SessionData::new(), 0).await.unwrap();
        assert!(store.retrieve("s1").await.unwrap().is_empty());
        assert!(!store.client().delete("s1").await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_read_does_not_reach_the_next_caller() {
        let port = fake_server(Quirks {
            slow_key: Some("alice"),
            ..Quirks::default()
        })
        .await;
        let kv = MemcacheKv::new(&local(port));
        kv.set("alice", br#"{"secret":"ada"}"#, 0).await.unwrap();
        kv.set("bob", br#"{"secret":"bob"}"#, 0).await.unwrap();

        let slow = tokio::time::timeout(Duration::from_millis(50), kv.get("alice")).await;
        assert!(slow.is_err());

        let bob = kv.get("bob").await.unwrap();
        assert_eq!(bob.as_deref(), Some(&br#"{"secret":"bob"}"#[..]));
    }

    #[tokio::test]
    async fn value_under_another_key_is_ignored() {
        let port = fake_server(Quirks {
            answer_as: Some("alice"),
            ..Quirks::default()
        })
        .await;
        let kv = MemcacheKv::new(&local(port));
        kv.set("alice", br#"{"secret":"ada"}"#, 0).await.unwrap();

        assert!(kv.get("bob").await.unwrap().is_none());
        assert!(kv.get("alice").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn keys_spread_over_servers_read_back() {
        let first = fake_server(Quirks::default()).await;
        let second = fake_server(Quirks::default()).await;
        let cfg = StoreConfig::default()
            .with_servers([format!("127.0.0.1:{first}"), format!("127.0.0.1:{second}")]);
        let kv = MemcacheKv::new(&cfg);

        for i in 0..16 {
            kv.set(&format!("s{i}"), format!("{i}").as_bytes(), 0)
                .await
                .unwrap();
        }
        for i in 0..16 {
            let value = kv.get(&format!("s{i}")).await.unwrap();
            assert_eq!(value, Some(format!("{i}").into_bytes()));
        }
    }

    #[tokio::test]
    async fn without_autoconnect_connect_is_required() {
        let port = fake_server(Quirks::default()).await;
        let kv = MemcacheKv::new(&local(port).with_autoconnect(false));
        let err = kv.get("s1").await.unwrap_err();
        assert!(matches!(err, SessionError::BackendUnavailable(_)));

        kv.connect().await.unwrap();
        assert!(kv.is_connected());
        assert!(kv.get("s1").await.unwrap().is_none());
    }
}
