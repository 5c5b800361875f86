//! Cache layer
//!
//! In-process cache for hot public reads (published blog listings, posts by
//! slug, FAQ and page lookups). Beacon runs as a single instance, so the
//! cache lives in memory and every service mutation invalidates the keys it
//! affects.
//!
//! # Usage
//!
//! ```rust,ignore
//! use beacon::cache::{create_cache, CacheLayer};
//!
//! let cache = create_cache(&config.cache);
//! cache.set("blog:slug:hello", &post, Duration::from_secs(60)).await?;
//! ```

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;

pub use memory::MemoryCache;

/// Cache operations used by the services.
///
/// Generic methods keep this trait from being object safe; services hold
/// the concrete [`SharedCache`].
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    /// Store a value that expires after `ttl`
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration)
        -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Drop every key starting with `prefix`
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Cache handle shared by every service
pub type SharedCache = Arc<MemoryCache>;

/// Build the cache from configuration
pub fn create_cache(config: &CacheConfig) -> SharedCache {
    Arc::new(MemoryCache::with_capacity_and_ttl(
        config.max_capacity,
        Duration::from_secs(config.ttl_seconds),
    ))
}
