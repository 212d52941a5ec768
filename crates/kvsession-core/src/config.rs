use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default Redis port.
pub const REDIS_DEFAULT_PORT: u16 = 6379;

/// Default memcache port.
pub const MEMCACHE_DEFAULT_PORT: u16 = 11211;

/// Connection settings handed to a backend factory.
///
/// Not every backend reads every key: `root` only matters to the disk store,
/// `host`/`port`/`autoconnect` only to the networked ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Server host for networked backends.
    #[serde(default = "default_host")]
    pub host: String,
    /// Falls back to the backend's own default when unset.
    #[serde(default)]
    pub port: Option<u16>,
    /// Disk store directory; the system temp dir when unset.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Memcache servers as `host` or `host:port`. When empty, `host` and
    /// `port` name the only server.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Connect lazily on first use. When false the caller must connect
    /// explicitly before the first operation.
    #[serde(default = "default_autoconnect")]
    pub autoconnect: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_autoconnect() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            root: None,
            servers: Vec::new(),
            autoconnect: default_autoconnect(),
        }
    }
}

impl StoreConfig {
    /// Sets the server host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the server port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the disk store directory.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Replaces the memcache server list.
    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Turns lazy connection on or off.
    pub fn with_autoconnect(mut self, autoconnect: bool) -> Self {
        self.autoconnect = autoconnect;
        self
    }

    /// Port to use, given the backend's default.
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// Every server as `host:port`, filling in `default_port` where an entry
    /// has none. Falls back to `host`/`port` when `servers` is empty.
    pub fn server_addrs(&self, default_port: u16) -> Vec<String> {
        if self.servers.is_empty() {
            return vec![format!("{}:{}", self.host, self.port_or(default_port))];
        }
        self.servers
            .iter()
            .map(|s| {
                if s.contains(':') {
                    s.clone()
                } else {
                    format!("{s}:{default_port}")
                }
            })
            .collect()
    }

    /// Root directory for file-backed stores.
    pub fn root_or_temp(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Settings for a session pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Registered backend name, matched case-insensitively.
    pub backend: String,
    /// Settings handed to the backend factory.
    #[serde(default)]
    pub store: StoreConfig,
    /// Idle sessions kept ready; the pool refills when it drops below this.
    #[serde(default = "default_min_size")]
    pub min_size: usize,
    /// Idle sessions after a refill.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
}

fn default_min_size() -> usize {
    2
}

fn default_max_size() -> usize {
    3
}

impl PoolConfig {
    /// Default sizes and store settings for `backend`.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            store: StoreConfig::default(),
            min_size: default_min_size(),
            max_size: default_max_size(),
        }
    }

    /// Replaces the store settings.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Sets the idle floor and refill target.
    pub fn with_sizes(mut self, min_size: usize, max_size: usize) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }
}
