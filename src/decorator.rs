//! Decorator surfaces (spec §6) — thin wrappers over the facade that derive
//! a [`CacheKey`] from call arguments via [`derive_key`].
//!
//! Deliberately thin: spec §1 excludes "decorator ergonomics beyond key
//! derivation" from this crate's scope, so there is no attribute-macro or
//! arbitrary-function-signature interception here — just the two wrapper
//! shapes spec §6 names (a fixed-size LRU wrapper with no TTL, and a TTL
//! wrapper with an optional `maxsize`) plus their `invalidate`/
//! `get_metrics`/`clear` operations.

use std::sync::Arc;

use tokio::time::Duration;

use crate::cache::{BoxLoadFn, Cache};
use crate::config::CacheConfig;
use crate::entry::Ttl;
use crate::error::{CacheError, ConfigError};
use crate::key::{derive_key, CacheKey, Encodable};
use crate::lru_index::Capacity;
use crate::metrics::MetricsSnapshot;

type LoadOutcome<V> = Result<V, CacheError>;

/// A fixed-size LRU cache over a derived call key, with no TTL (spec §6).
pub struct LruCached<V> {
    cache: Arc<Cache<CacheKey, V>>,
    skip_args: usize,
}

impl<V: Clone + Send + Sync + 'static> LruCached<V> {
    pub fn new(maxsize: usize, skip_args: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            cache: Cache::new(CacheConfig {
                maxsize: Capacity::Bounded(maxsize),
                default_ttl: None,
                ..CacheConfig::default()
            })?,
            skip_args,
        })
    }

    /// `use_cache = false` bypasses the hit path for this call while still
    /// collapsing with any other concurrent caller on the same key (spec
    /// §6/§4.7 — see `Cache::get_with`).
    pub async fn call(
        &self,
        args: &[&dyn Encodable],
        loader: BoxLoadFn<V>,
        use_cache: bool,
    ) -> LoadOutcome<V> {
        let key = derive_key(args, self.skip_args);
        self.cache
            .get_with(key, move || loader(), Ttl::Default, use_cache)
            .await
    }

    pub async fn invalidate(&self, args: &[&dyn Encodable]) -> bool {
        self.cache.delete(&derive_key(args, self.skip_args)).await
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.cache.get_metrics()
    }

    pub async fn clear(&self) {
        self.cache.clear().await
    }
}

/// A TTL cache over a derived call key, with an optional `maxsize` (spec
/// §6: "a TTL wrapper (with optional `maxsize`)").
pub struct TtlCached<V> {
    cache: Arc<Cache<CacheKey, V>>,
    skip_args: usize,
    ttl: Duration,
}

impl<V: Clone + Send + Sync + 'static> TtlCached<V> {
    pub fn new(ttl: Duration, maxsize: Option<usize>, skip_args: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            cache: Cache::new(CacheConfig {
                maxsize: maxsize.map(Capacity::Bounded).unwrap_or(Capacity::Unlimited),
                default_ttl: Some(ttl),
                ..CacheConfig::default()
            })?,
            skip_args,
            ttl,
        })
    }

    /// `use_cache = false` has the same bypass semantics as
    /// [`LruCached::call`].
    pub async fn call(
        &self,
        args: &[&dyn Encodable],
        loader: BoxLoadFn<V>,
        use_cache: bool,
    ) -> LoadOutcome<V> {
        let key = derive_key(args, self.skip_args);
        self.cache
            .get_with(key, move || loader(), Ttl::For(self.ttl), use_cache)
            .await
    }

    pub async fn invalidate(&self, args: &[&dyn Encodable]) -> bool {
        self.cache.delete(&derive_key(args, self.skip_args)).await
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.cache.get_metrics()
    }

    pub async fn clear(&self) {
        self.cache.clear().await
    }
}
