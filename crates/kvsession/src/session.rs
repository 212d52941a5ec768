use crate::pool::PoolShared;
use kvsession_core::{generate_session_id, SessionData, SessionError, SessionResult};
use kvsession_store::SessionStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;

/// One client's server-side key/value state plus its identity.
///
/// A session moves through `new → started → ended`. `start` loads data from
/// the bound store, the accessors work on the in-memory copy, and `end`
/// writes it back when something changed or an expiry was requested.
pub struct Session {
    id: String,
    data: SessionData,
    started: bool,
    dirty: bool,
    in_use: bool,
    store: Arc<dyn SessionStore>,
    pool: Option<Weak<PoolShared>>,
}

impl Session {
    /// A session with a freshly generated id, not bound to any pool.
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self::with_id(store, generate_session_id())
    }

    /// An unpooled session under a caller-chosen id.
    pub fn with_id(store: Arc<dyn SessionStore>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: SessionData::new(),
            started: false,
            dirty: false,
            in_use: false,
            store,
            pool: None,
        }
    }

    pub(crate) fn pooled(store: Arc<dyn SessionStore>, pool: Weak<PoolShared>) -> Self {
        let mut session = Self::new(store);
        session.pool = Some(pool);
        session
    }

    /// The key the data is stored under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether `start` has loaded the data and `end` has not run since.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Whether there are changes `end` still has to write.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether a pool has handed this session out.
    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub(crate) fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    /// Backend the session reads from and writes to.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn ensure_started(&self) -> SessionResult<()> {
        if self.started {
            Ok(())
        } else {
            Err(SessionError::NotStarted)
        }
    }

    /// Loads the session's data from the store.
    ///
    /// `id` replaces the current id before loading. Calling `start` on an
    /// already started session does nothing.
    pub async fn start(&mut self, id: Option<&str>) -> SessionResult<()> {
        if self.started {
            return Ok(());
        }
        if let Some(id) = id {
            self.id = id.to_string();
        }
        self.data = self.store.retrieve(&self.id).await?;
        self.started = true;
        debug!(
            session_id = %self.id,
            backend = %self.store.name(),
            keys = self.data.len(),
            "Session started"
        );
        Ok(())
    }

    /// Persists the session and leaves the started state.
    ///
    /// With `expire_secs == 0` and nothing changed this returns without
    /// touching the store. A non-zero expiry always writes, which also
    /// refreshes the TTL of an unchanged session.
    pub async fn end(&mut self, expire_secs: u64) -> SessionResult<()> {
        if expire_secs == 0 && !self.dirty {
            self.started = false;
            return Ok(());
        }
        self.ensure_started()?;
        self.store.store(&self.id, &self.data, expire_secs).await?;
        self.dirty = false;
        self.started = false;
        debug!(session_id = %self.id, expire_secs, "Session saved");
        Ok(())
    }

    /// Value under `key`, if any.
    pub fn get(&self, key: &str) -> SessionResult<Option<&Value>> {
        self.ensure_started()?;
        Ok(self.data.get(key))
    }

    /// Reads `key` and converts it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> SessionResult<Option<T>> {
        match self.get(key)? {
            Some(value) => T::deserialize(value).map(Some).map_err(|e| {
                SessionError::CorruptSessionData(format!("Value for {key:?} has wrong shape: {e}"))
            }),
            None => Ok(None),
        }
    }

    /// Stores `value` under `key` and marks the session dirty.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> SessionResult<()> {
        self.ensure_started()?;
        let key = key.into();
        let value = to_value(&key, value)?;
        self.data.insert(key, value);
        self.dirty = true;
        Ok(())
    }

    /// Removes `key`, returning its old value.
    ///
    /// Removing an absent key leaves the session clean.
    pub fn delete(&mut self, key: &str) -> SessionResult<Option<Value>> {
        self.ensure_started()?;
        let removed = self.data.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        Ok(removed)
    }

    /// Looks up several keys at once; absent ones map to `None`.
    pub fn multi_get<I, K>(&self, keys: I) -> SessionResult<HashMap<String, Option<Value>>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.ensure_started()?;
        Ok(keys
            .into_iter()
            .map(|k| {
                let k = k.as_ref();
                (k.to_string(), self.data.get(k).cloned())
            })
            .collect())
    }

    /// Sets every pair, or none of them if a value fails to serialize.
    pub fn multi_set<I, K, T>(&mut self, pairs: I) -> SessionResult<()>
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Serialize,
    {
        self.ensure_started()?;
        let converted = pairs
            .into_iter()
            .map(|(k, v)| {
                let k = k.into();
                let v = to_value(&k, v)?;
                Ok((k, v))
            })
            .collect::<SessionResult<Vec<_>>>()?;
        if !converted.is_empty() {
            self.data.extend(converted);
            self.dirty = true;
        }
        Ok(())
    }

    /// Whether `key` is set.
    pub fn contains(&self, key: &str) -> SessionResult<bool> {
        self.ensure_started()?;
        Ok(self.data.contains_key(key))
    }

    /// Every key and value.
    pub fn all(&self) -> SessionResult<&SessionData> {
        self.ensure_started()?;
        Ok(&self.data)
    }

    /// Clears the in-memory data. Nothing is written until the next `end`.
    pub fn destroy(&mut self) {
        self.data.clear();
        self.dirty = true;
    }

    /// Gives the session a new id (random unless one is supplied) and
    /// returns it. Data is kept and will be saved under the new id.
    pub fn refresh_id(&mut self, id: Option<&str>) -> &str {
        self.id = match id {
            Some(id) => id.to_string(),
            None => generate_session_id(),
        };
        self.dirty = true;
        &self.id
    }

    /// Prepares a previously borrowed session for a new borrower.
    ///
    /// Unlike [`Session::refresh_id`], which keeps the data and marks the
    /// session dirty so it is saved under the new id, this drops the data and
    /// leaves the session clean: nothing of the previous borrower is written
    /// or visible under the new id.
    pub(crate) fn recycle(&mut self) {
        let previous = std::mem::replace(&mut self.id, generate_session_id());
        self.data.clear();
        self.started = false;
        self.dirty = false;
        debug!(previous = %previous, session_id = %self.id, "Recycled pooled session");
    }

    /// Returns the session to the pool it came from.
    ///
    /// Flags are left as they are, so end the session first. A session with
    /// no live pool is handed back as `Err`.
    pub fn cache(self) -> Result<(), Session> {
        match self.pool.as_ref().and_then(Weak::upgrade) {
            Some(pool) => {
                pool.push(self);
                Ok(())
            }
            None => Err(self),
        }
    }

    /// Removes one key from another session's stored record.
    ///
    /// Returns whether the key was present. The record is rewritten without
    /// an expiry.
    pub async fn delete_stored_key(&self, session_id: &str, key: &str) -> SessionResult<bool> {
        let mut data = self.store.retrieve(session_id).await?;
        if data.remove(key).is_none() {
            return Ok(false);
        }
        self.store.store(session_id, &data, 0).await?;
        Ok(true)
    }

    /// Removes another session's stored record entirely.
    pub async fn destroy_stored(&self, session_id: &str) -> SessionResult<()> {
        self.store.remove(session_id).await
    }
}

fn to_value<T: Serialize>(key: &str, value: T) -> SessionResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        SessionError::CorruptSessionData(format!("Value for {key:?} cannot be serialized: {e}"))
    })
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("keys", &self.data.len())
            .field("started", &self.started)
            .field("dirty", &self.dirty)
            .field("in_use", &self.in_use)
            .field("backend", &self.store.name())
            .finish()
    }
}
