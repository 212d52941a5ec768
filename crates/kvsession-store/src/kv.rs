use crate::codec;
use crate::store::SessionStore;
use async_trait::async_trait;
use kvsession_core::{SessionData, SessionResult};
use tracing::debug;

/// Minimal asynchronous key-value capability a session backend needs.
///
/// Implementations map these onto their own wire protocol; values are opaque
/// bytes.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Fetches the value under `key`, `None` when absent or expired.
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>>;

    /// Writes `value` under `key`. A non-zero `ttl_secs` must be applied
    /// together with the write.
    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> SessionResult<()>;

    /// Deletes `key`, returning whether anything was removed.
    async fn delete(&self, key: &str) -> SessionResult<bool>;
}

/// [`SessionStore`] over any [`KvClient`].
///
/// Owns payload encoding and the delete-on-empty convention so that the
/// clients stay protocol-only.
pub struct KvSessionStore<C> {
    name: String,
    client: C,
}

impl<C: KvClient> KvSessionStore<C> {
    /// Wraps `client`, reporting `name` as the backend name.
    pub fn new(name: impl Into<String>, client: C) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }

    /// The underlying client, e.g. to connect it explicitly.
    pub fn client(&self) -> &C {
        &self.client
    }
}

#[async_trait]
impl<C: KvClient> SessionStore for KvSessionStore<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn store(&self, id: &str, payload: &SessionData, expire_secs: u64) -> SessionResult<()> {
        if payload.is_empty() {
            let removed = self.client.delete(id).await?;
            debug!(backend = %self.name, session_id = %id, removed, "Deleted empty session");
            return Ok(());
        }
        let bytes = codec::encode(payload)?;
        self.client.set(id, &bytes, expire_secs).await?;
        debug!(
            backend = %self.name,
            session_id = %id,
            bytes = bytes.len(),
            expire_secs,
            "Stored session"
        );
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> SessionResult<SessionData> {
        match self.client.get(id).await? {
            Some(bytes) => codec::decode(&bytes),
            None => Ok(SessionData::new()),
        }
    }
}
