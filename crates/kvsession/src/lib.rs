//! Pooled key/value sessions over pluggable storage.
//!
//! A [`SessionPool`] hands out [`Session`]s bound to one backend. A borrower
//! starts the session (loading its data), reads and writes keys, ends it
//! (saving only when something changed or an expiry was asked for) and gives
//! it back with [`Session::cache`].
//!
//! ```no_run
//! # async fn demo() -> kvsession::SessionResult<()> {
//! use kvsession::{PoolConfig, SessionPool, StoreRegistry};
//!
//! let registry = StoreRegistry::with_builtin();
//! let pool = SessionPool::new(&registry, &PoolConfig::new("redis"))?;
//!
//! let mut session = pool.get_session();
//! session.start(Some("client-cookie-id")).await?;
//! session.set("user", "ada")?;
//! session.end(3600).await?;
//! let _ = session.cache();
//! # Ok(())
//! # }
//! ```

/// Bounded pool of reusable sessions.
pub mod pool;
/// Per-request session state machine.
pub mod session;

pub use kvsession_core::{
    generate_session_id, PoolConfig, SessionData, SessionError, SessionResult, StoreConfig,
};
pub use kvsession_store::{SessionStore, StoreRegistry};
pub use pool::SessionPool;
pub use session::Session;
