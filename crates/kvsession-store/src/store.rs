use async_trait::async_trait;
use kvsession_core::{SessionData, SessionResult};

/// Persistence contract every session backend implements.
///
/// Stores own the byte-level encoding of session payloads; callers only ever
/// see [`SessionData`]. A store is not tied to one session and is shared
/// between many of them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Name the store was registered under.
    fn name(&self) -> &str;

    /// Writes `payload` under `id`.
    ///
    /// An empty payload deletes the record instead of keeping an empty one.
    /// `expire_secs > 0` installs an expiry together with the write; `0`
    /// means the record never expires.
    async fn store(&self, id: &str, payload: &SessionData, expire_secs: u64) -> SessionResult<()>;

    /// Reads the record stored under `id`.
    ///
    /// Absent and expired records both come back as an empty mapping.
    async fn retrieve(&self, id: &str) -> SessionResult<SessionData>;

    /// Removes the record stored under `id`.
    async fn remove(&self, id: &str) -> SessionResult<()> {
        self.store(id, &SessionData::new(), 0).await
    }
}
