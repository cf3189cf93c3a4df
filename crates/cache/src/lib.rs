//! Redis-backed distributed locking and short-TTL caching. Two concerns
//! share one connection: per-key locks (`exec:<id>`, `llm_lock:<symbol>`)
//! that serialize work across worker processes, and a JSON cache used to
//! deduplicate expensive LLM analyses within a time bucket.
//!
//! Lock loss degrades to "always acquire" and cache loss degrades to
//! "always miss" at the call site — this crate surfaces Redis errors
//! rather than swallowing them, since the caller is in the best position
//! to decide whether a given failure should fall back or propagate.

pub mod analysis;
pub mod error;
pub mod lock;

use std::time::Duration;

use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use error::CacheError;

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    /// Attempts to acquire `key` with the given holder `token` and TTL.
    /// Returns `false` without error if another holder already has it.
    pub async fn try_acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        lock::try_acquire(&mut conn, key, token, ttl).await
    }

    /// No-op if `key` is already expired or held by a different token.
    pub async fn release_lock(&self, key: &str, token: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        lock::release(&mut conn, key, token).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::AsyncCommands::get(&mut conn, key).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value)?;
        redis::AsyncCommands::set_ex::<_, _, ()>(&mut conn, key, raw, ttl.as_secs()).await?;
        Ok(())
    }
}
