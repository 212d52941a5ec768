use crate::kv::{KvClient, KvSessionStore};
use async_trait::async_trait;
use kvsession_core::SessionResult;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A session store kept entirely in process memory.
pub type MemoryStore = KvSessionStore<MemoryKv>;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-process key-value map with per-key expiry.
///
/// Expired entries are dropped when they are next read, or in bulk by
/// [`MemoryKv::purge_expired`].
pub struct MemoryKv {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKv {
    /// An empty map.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether no entries are stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn get(&self, key: &str) -> SessionResult<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(e) if !e.is_expired(now) => return Ok(Some(e.value.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write().await;
        // Re-check: a writer may have replaced the entry in between.
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> SessionResult<()> {
        // A deadline past what `Instant` can represent never arrives.
        let expires_at = if ttl_secs > 0 {
            Instant::now().checked_add(Duration::from_secs(ttl_secs))
        } else {
            None
        };
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> SessionResult<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some())
    }
}
