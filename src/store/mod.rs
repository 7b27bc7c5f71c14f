//! Expiring key-value storage.
//!
//! Every stateful guard (lockout, CSRF, rate limiting, RBAC cache) keeps its
//! records behind [`ExpiringStore`] and never sees a concrete backend. The
//! backend is picked once at startup by [`connect`]: a TTL-native redis
//! store when one is configured and reachable, the in-process fallback
//! otherwise.

pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::CacheConfig;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Error raised by an expiring store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis command or connection failure.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
    /// Stored record could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A key-value store whose entries expire after a per-key ttl.
///
/// A key set with a ttl reads back as absent once the ttl elapses, whether
/// the backend enforces that natively or the implementation checks an expiry
/// timestamp on every read.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Read a key; absent and expired are indistinguishable.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a key with a ttl, replacing any previous value and ttl.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Delete a key; deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Select the store backend, once, at startup.
///
/// Probes the configured redis URL with a `PING`; on any failure the
/// in-process store is used and callers are none the wiser.
pub async fn connect(config: &CacheConfig) -> Arc<dyn ExpiringStore> {
    if let Some(url) = &config.url {
        match RedisStore::connect(url).await {
            Ok(store) => {
                info!(%url, "expiring store backed by redis");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(%url, %error, "redis unreachable, falling back to in-process store");
            }
        }
    }
    info!("expiring store backed by in-process map");
    Arc::new(MemoryStore::new())
}
