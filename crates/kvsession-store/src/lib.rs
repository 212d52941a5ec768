//! Session storage backends for kvsession.
//!
//! Every backend implements [`SessionStore`]. The key-value backends share
//! [`KvSessionStore`], which owns payload encoding on top of a protocol-level
//! [`KvClient`]. Backends are looked up by name through a [`StoreRegistry`].

/// JSON encoding of session payloads.
pub mod codec;
/// One-file-per-session store.
pub mod disk;
/// Adapter from key-value clients to [`SessionStore`].
pub mod kv;
pub mod memcache_kv;
/// In-process key-value map.
pub mod memory;
/// Redis client.
pub mod redis_kv;
/// Backend lookup by name.
pub mod registry;
/// The store contract.
pub mod store;

pub use disk::DiskStore;
pub use kv::{KvClient, KvSessionStore};
pub use memcache_kv::{MemcacheKv, MemcacheStore};
pub use memory::{MemoryKv, MemoryStore};
pub use redis_kv::{RedisKv, RedisStore};
pub use registry::{StoreFactory, StoreRegistry};
pub use store::SessionStore;
