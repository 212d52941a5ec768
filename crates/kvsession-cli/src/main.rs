//! Command-line access to stored sessions.

use clap::{Parser, Subcommand};
use kvsession::{PoolConfig, Session, SessionPool, StoreRegistry};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kvsession", about = "Inspect and edit stored sessions")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "kvsession.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every key of a session as JSON
    Show { id: String },
    /// Print one key
    Get { id: String, key: String },
    /// Set one key; the value is parsed as JSON, falling back to a string
    Set {
        id: String,
        key: String,
        value: String,
        /// Expire the session after this many seconds (0 = never)
        #[arg(short, long, default_value_t = 0)]
        expire: u64,
    },
    /// Remove one key
    Del { id: String, key: String },
    /// Remove the whole stored session
    Purge { id: String },
    /// List available backends
    Backends,
}

#[derive(Deserialize)]
struct KvsessionConfig {
    pool: PoolConfig,
}

async fn load_config(path: &Path) -> anyhow::Result<KvsessionConfig> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
    })?;
    Ok(toml::from_str(&raw)?)
}

fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Borrows a session, starts it under `id`, runs `f`, then ends and returns it.
async fn with_session<T>(
    pool: &SessionPool,
    id: &str,
    expire: u64,
    f: impl FnOnce(&mut Session) -> kvsession::SessionResult<T>,
) -> anyhow::Result<T> {
    let mut session = pool.get_session();
    session.start(Some(id)).await?;
    let out = f(&mut session)?;
    session.end(expire).await?;
    let _ = session.cache();
    Ok(out)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = StoreRegistry::with_builtin();

    if let Commands::Backends = cli.command {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let config = load_config(&cli.config).await?;
    let pool = SessionPool::new(&registry, &config.pool)?;
    info!(backend = %pool.backend(), "Using session backend");

    match cli.command {
        Commands::Show { id } => {
            let data = with_session(&pool, &id, 0, |s| Ok(s.all()?.clone())).await?;
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Commands::Get { id, key } => {
            let value = with_session(&pool, &id, 0, |s| Ok(s.get(&key)?.cloned())).await?;
            match value {
                Some(v) => println!("{v}"),
                None => anyhow::bail!("key '{key}' not found in session '{id}'"),
            }
        }
        Commands::Set {
            id,
            key,
            value,
            expire,
        } => {
            let value = parse_value(&value);
            with_session(&pool, &id, expire, |s| s.set(key, value)).await?;
        }
        Commands::Del { id, key } => {
            let removed = with_session(&pool, &id, 0, |s| s.delete(&key)).await?;
            if removed.is_none() {
                anyhow::bail!("key '{key}' not found in session '{id}'");
            }
        }
        Commands::Purge { id } => {
            pool.store().remove(&id).await?;
            info!(session_id = %id, "Session purged");
        }
        Commands::Backends => {}
    }

    Ok(())
}
