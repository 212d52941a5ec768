use crate::session::Session;
use kvsession_core::{PoolConfig, SessionError, SessionResult};
use kvsession_store::{SessionStore, StoreRegistry};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct PoolShared {
    idle: Mutex<VecDeque<Session>>,
    store: Arc<dyn SessionStore>,
    backend: String,
    min_size: usize,
    max_size: usize,
}

impl PoolShared {
    pub(crate) fn push(&self, session: Session) {
        let mut idle = self.idle.lock();
        idle.push_back(session);
        debug!(backend = %self.backend, idle = idle.len(), "Session returned to pool");
    }
}

/// Bounded FIFO pool of reusable [`Session`]s bound to one backend.
///
/// The pool resolves its backend once and shares that store with every
/// session it builds. Cloning the pool is cheap and yields a handle to the
/// same queue.
#[derive(Clone)]
pub struct SessionPool {
    shared: Arc<PoolShared>,
}

impl SessionPool {
    /// Resolves `config.backend` in `registry` and pre-fills `min_size`
    /// sessions.
    pub fn new(registry: &StoreRegistry, config: &PoolConfig) -> SessionResult<Self> {
        check_sizes(config.min_size, config.max_size)?;
        let store = registry.resolve(&config.backend, &config.store)?;
        let pool = Self::build(store, config.backend.to_lowercase(), config.min_size, config.max_size);
        info!(
            backend = %pool.shared.backend,
            min_size = config.min_size,
            max_size = config.max_size,
            "Session pool ready"
        );
        Ok(pool)
    }

    /// A pool over an already constructed store.
    pub fn from_store(
        store: Arc<dyn SessionStore>,
        min_size: usize,
        max_size: usize,
    ) -> SessionResult<Self> {
        check_sizes(min_size, max_size)?;
        let backend = store.name().to_string();
        Ok(Self::build(store, backend, min_size, max_size))
    }

    fn build(store: Arc<dyn SessionStore>, backend: String, min_size: usize, max_size: usize) -> Self {
        let shared = Arc::new_cyclic(|weak| {
            let idle = (0..min_size)
                .map(|_| Session::pooled(store.clone(), weak.clone()))
                .collect();
            PoolShared {
                idle: Mutex::new(idle),
                store,
                backend,
                min_size,
                max_size,
            }
        });
        Self { shared }
    }

    /// Checks a session out of the pool.
    ///
    /// Refills to `max_size` first when fewer than `min_size` sessions are
    /// idle. A session that is still flagged as in use from an earlier
    /// checkout gets a fresh id and cleared state before it is handed out.
    pub fn get_session(&self) -> Session {
        let mut idle = self.shared.idle.lock();
        if idle.len() < self.shared.min_size {
            let added = self.shared.max_size - idle.len();
            for _ in 0..added {
                idle.push_back(self.new_session());
            }
            debug!(backend = %self.shared.backend, added, "Replenished session pool");
        }

        let mut session = idle.pop_front().unwrap_or_else(|| self.new_session());
        if session.in_use() {
            session.recycle();
        } else {
            session.set_in_use(true);
        }
        session
    }

    /// Returns a session to the tail of the queue. Its flags are not reset.
    pub fn cache(&self, session: Session) {
        self.shared.push(session);
    }

    /// Number of idle sessions.
    pub fn cache_size(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Idle floor that triggers a refill.
    pub fn min_size(&self) -> usize {
        self.shared.min_size
    }

    /// Idle count after a refill.
    pub fn max_size(&self) -> usize {
        self.shared.max_size
    }

    /// Name of the backend every pooled session is bound to.
    pub fn backend(&self) -> &str {
        &self.shared.backend
    }

    /// Store shared by every session of this pool.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.shared.store
    }

    fn new_session(&self) -> Session {
        Session::pooled(self.shared.store.clone(), Arc::downgrade(&self.shared))
    }
}

fn check_sizes(min: usize, max: usize) -> SessionResult<()> {
    if min > max {
        return Err(SessionError::InvalidPoolSize { min, max });
    }
    Ok(())
}

impl fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionPool")
            .field("backend", &self.shared.backend)
            .field("idle", &self.cache_size())
            .field("min_size", &self.shared.min_size)
            .field("max_size", &self.shared.max_size)
            .finish()
    }
}
