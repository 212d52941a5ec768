use crate::disk::DiskStore;
use crate::kv::KvSessionStore;
use crate::memcache_kv::MemcacheKv;
use crate::memory::MemoryKv;
use crate::redis_kv::RedisKv;
use crate::store::SessionStore;
use kvsession_core::{SessionError, SessionResult, StoreConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds a store from connection settings.
pub type StoreFactory =
    Arc<dyn Fn(&StoreConfig) -> SessionResult<Arc<dyn SessionStore>> + Send + Sync>;

/// Maps backend names to store factories.
///
/// Names are matched case-insensitively. A registry is an ordinary value:
/// build one at startup and hand it to whoever creates pools.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `memory`, `redis`, `memcache` and `disk` registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |_| {
            Ok(Arc::new(KvSessionStore::new("memory", MemoryKv::new())) as Arc<dyn SessionStore>)
        });
        registry.register("redis", |cfg| {
            Ok(Arc::new(KvSessionStore::new("redis", RedisKv::new(cfg)?)) as Arc<dyn SessionStore>)
        });
        registry.register("memcache", |cfg| {
            Ok(Arc::new(KvSessionStore::new("memcache", MemcacheKv::new(cfg))) as Arc<dyn SessionStore>)
        });
        registry.register("disk", |cfg| {
            Ok(Arc::new(DiskStore::new(cfg.root_or_temp())?) as Arc<dyn SessionStore>)
        });
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&StoreConfig) -> SessionResult<Arc<dyn SessionStore>> + Send + Sync + 'static,
    {
        let name = name.to_lowercase();
        debug!(backend = %name, "Registered session backend");
        self.factories.insert(name, Arc::new(factory));
    }

    /// Whether a backend is registered under `name`, ignoring case.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds the store registered under `name`.
    pub fn resolve(&self, name: &str, config: &StoreConfig) -> SessionResult<Arc<dyn SessionStore>> {
        let key = name.to_lowercase();
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| SessionError::UnknownBackend(name.to_string()))?;
        let store = factory(config)?;
        info!(backend = %key, "Resolved session backend");
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtin_names() {
        let registry = StoreRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["disk", "memcache", "memory", "redis"]);
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let registry = StoreRegistry::with_builtin();
        let store = registry.resolve("MeMoRy", &StoreConfig::default()).unwrap();
        assert_eq!(store.name(), "memory");
        assert!(registry.contains("REDIS"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let registry = StoreRegistry::with_builtin();
        let err = registry
            .resolve("cassandra", &StoreConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::UnknownBackend(name) if name == "cassandra"));
    }

    #[test]
    fn empty_registry_knows_nothing() {
        let registry = StoreRegistry::new();
        assert!(registry.names().is_empty());
        assert!(registry.resolve("memory", &StoreConfig::default()).is_err());
    }

    #[test]
    fn disk_uses_configured_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("sessions");
        let cfg = StoreConfig::default().with_root(&root);
        let store = StoreRegistry::with_builtin().resolve("disk", &cfg).unwrap();
        assert_eq!(store.name(), "disk");
        assert!(root.is_dir());
    }

    #[test]
    fn networked_backends_resolve_without_connecting() {
        let registry = StoreRegistry::with_builtin();
        let cfg = StoreConfig::default().with_host("127.0.0.1").with_port(1);
        assert_eq!(registry.resolve("redis", &cfg).unwrap().name(), "redis");
        assert_eq!(registry.resolve("memcache", &cfg).unwrap().name(), "memcache");
    }

    #[test]
    fn custom_backend_can_be_registered() {
        let mut registry = StoreRegistry::new();
        registry.register("Scratch", |_| {
            Ok(Arc::new(KvSessionStore::new("scratch", MemoryKv::new())) as Arc<dyn SessionStore>)
        });
        let store = registry.resolve("scratch", &StoreConfig::default()).unwrap();
        assert_eq!(store.name(), "scratch");
    }
}
