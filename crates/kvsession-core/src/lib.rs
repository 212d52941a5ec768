//! Core types shared by every kvsession crate.
//!
//! # Main types
//!
//! - [`SessionError`] — Unified error enum for stores, sessions and pools.
//! - [`SessionResult`] — Convenience alias for `Result<T, SessionError>`.
//! - [`SessionData`] — The key/value payload of one session.
//! - [`StoreConfig`] / [`PoolConfig`] — Backend and pool settings.

/// Backend and pool configuration.
pub mod config;
/// Error types.
pub mod error;

pub use config::{PoolConfig, StoreConfig, MEMCACHE_DEFAULT_PORT, REDIS_DEFAULT_PORT};
pub use error::{SessionError, SessionResult};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use std::collections::HashMap;
use uuid::Uuid;

/// The live key/value state of a session.
pub type SessionData = HashMap<String, serde_json::Value>;

/// Generates a fresh URL-safe session id from 128 random bits.
///
/// The result is 22 characters of unpadded base64url and never contains a
/// path separator.
pub fn generate_session_id() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes())
}
