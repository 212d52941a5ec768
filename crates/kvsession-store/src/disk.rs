use crate::store::SessionStore;
use async_trait::async_trait;
use chrono::Utc;
use kvsession_core::{SessionData, SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Distinguishes concurrent temp files written for the same id.
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-disk layout of one session file.
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    data: SessionData,
    /// Unix seconds after which the record is stale; `0` never expires.
    expires_at: i64,
}

/// File-based session store: one JSON file per session id.
///
/// Expiry is enforced lazily: a stale file is deleted when it is read.
/// A write lands in a temp file under `root` that is then renamed over the
/// session file, so a reader sees either the old record or the new one.
/// Writes are best-effort; an I/O failure while writing is logged and
/// otherwise ignored, so a successful `store` does not guarantee durability.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Creates the store, making `root` if it does not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> SessionResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            SessionError::BackendUnavailable(format!(
                "Failed to create session dir {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    /// Directory holding the session files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, id: &str) -> SessionResult<PathBuf> {
        if id.is_empty()
            || id == "."
            || id == ".."
            || id.contains(std::path::MAIN_SEPARATOR)
            || id.contains('/')
        {
            return Err(SessionError::InvalidSessionId(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    /// Writes `bytes` next to `path` and renames the result into place.
    async fn replace_file(&self, id: &str, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!(".{id}.{}.{seq}.tmp", std::process::id()));
        let result = match tokio::fs::write(&tmp, bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, path).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            Self::remove_file(&tmp).await;
        }
        result
    }

    async fn remove_file(path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove session file"),
        }
    }
}

#[async_trait]
impl SessionStore for DiskStore {
    fn name(&self) -> &str {
        "disk"
    }

    async fn store(&self, id: &str, payload: &SessionData, expire_secs: u64) -> SessionResult<()> {
        let path = self.session_path(id)?;
        if payload.is_empty() {
            Self::remove_file(&path).await;
            return Ok(());
        }

        let expires_at = if expire_secs == 0 {
            0
        } else {
            Utc::now()
                .timestamp()
                .saturating_add(i64::try_from(expire_secs).unwrap_or(i64::MAX))
        };
        let record = DiskRecord {
            data: payload.clone(),
            expires_at,
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| SessionError::CorruptSessionData(format!("Failed to encode session: {e}")))?;

        if let Err(e) = self.replace_file(id, &path, &json).await {
            warn!(session_id = %id, error = %e, "Failed to write session file");
        } else {
            debug!(session_id = %id, expires_at, "Stored session file");
        }
        Ok(())
    }

    async fn retrieve(&self, id: &str) -> SessionResult<SessionData> {
        let path = self.session_path(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SessionData::new()),
            Err(e) => return Err(e.into()),
        };
        let record: DiskRecord = serde_json::from_slice(&bytes).map_err(|e| {
            SessionError::CorruptSessionData(format!("Failed to parse session file {id}: {e}"))
        })?;

        if record.expires_at > 0 && record.expires_at < Utc::now().timestamp() {
            debug!(session_id = %id, "Session file expired");
            Self::remove_file(&path).await;
            return Ok(SessionData::new());
        }
        Ok(record.data)
    }
}
