//! Cache Facade (C8, spec §4.7) — composes C1-C7 into the public
//! operations `get`, `set`, `delete`, `clear`, `warmup`, `get_metrics`.
//!
//! Structurally this plays the same role as `CachedProvider`/
//! `CachedEmbeddingProvider` in the teacher: a lock-guarded index wrapping
//! an inner source of truth, with a lookup-then-load-then-insert flow and a
//! short critical section around the index itself (never held across the
//! loader's `.await`).

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::batch::{BatchCoalescer, BatchLoader};
use crate::clock::{system_clock, SharedClock};
use crate::config::CacheConfig;
use crate::entry::{Entry, Ttl};
use crate::error::{CacheError, ConfigError};
use crate::lru_index::LruIndex;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::single_flight::SingleFlight;

type LoadOutcome<V> = Result<V, CacheError>;

/// The in-process cache engine (spec §3's "Global Cache State").
pub struct Cache<K, V> {
    state: Mutex<LruIndex<K, V>>,
    inflight: SingleFlight<K, V>,
    batches: Arc<BatchCoalescer<K, V>>,
    metrics: Metrics,
    config: CacheConfig,
    clock: SharedClock,
}

/// Aggregate report for `warmup` (spec §4.7: "Errors during warmup do not
/// abort the remaining entries; they are reported in aggregate").
#[derive(Debug)]
pub struct WarmupReport<K> {
    pub loaded: usize,
    pub skipped_present: usize,
    pub errors: Vec<(K, CacheError)>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Validates `config` (spec §7's construction-time `ConfigError`) before
    /// building the cache — this is the crate's only public construction
    /// path, so an invalid config can never reach `LruIndex`/`BatchCoalescer`.
    pub fn new(config: CacheConfig) -> Result<Arc<Self>, ConfigError> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: CacheConfig, clock: SharedClock) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let metrics = Metrics::new();
        Ok(Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
            let weak_for_success = weak.clone();
            // Invoked by `BatchCoalescer::flush` and awaited inline, before
            // that key's waiter is woken (spec §2 step 4: insert happens
            // before wake) — not spawned, so there is no race between the
            // insert landing and the caller's `get_with_batch(...).await`
            // returning.
            let on_success: Arc<dyn Fn(K, V, Ttl) -> BoxFuture<'static, ()> + Send + Sync> =
                Arc::new(move |key: K, value: V, ttl: Ttl| {
                    let weak = weak_for_success.clone();
                    async move {
                        if let Some(this) = weak.upgrade() {
                            this.insert(key, value, ttl).await;
                        }
                    }
                    .boxed()
                });
            Self {
                state: Mutex::new(LruIndex::new(config.maxsize)),
                inflight: SingleFlight::new(),
                batches: Arc::new(BatchCoalescer::new(
                    config.batch_window,
                    config.max_batch_size,
                    metrics.clone(),
                    on_success,
                )),
                metrics,
                config,
                clock,
            }
        }))
    }

    /// Lookup-only path, step 1 of spec §2's control flow: consult LRU+TTL,
    /// touch on hit, lazily expire on a stale hit. Records exactly one of
    /// hit/miss.
    pub async fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let hit = match state.lookup_mut(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_expired) => {
                state.delete(key);
                None
            }
            None => None,
        };
        state.sweep_expired(now);
        drop(state);

        if hit.is_some() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        hit
    }

    /// `get` with a unary loader (spec §4.7): on miss, route through
    /// `SingleFlight` directly (no batch coalescing).
    ///
    /// `use_cache = false` bypasses the hit path entirely (spec §6: always
    /// run the loader and `set` the result) while still joining
    /// `SingleFlight` — so it collapses with any other concurrent caller,
    /// `use_cache` true or false, already loading the same key.
    pub async fn get_with<F, Fut>(
        &self,
        key: K,
        loader: F,
        ttl: Ttl,
        use_cache: bool,
    ) -> LoadOutcome<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = LoadOutcome<V>> + Send + 'static,
    {
        if use_cache {
            if let Some(v) = self.get(&key).await {
                return Ok(v);
            }
        }

        let key_for_store = key.clone();
        let (result, is_leader) = self.inflight.run(key, loader).await;

        if is_leader {
            self.metrics.record_load();
            if let Ok(ref v) = result {
                self.insert(key_for_store, v.clone(), ttl).await;
            }
        } else if result.is_ok() {
            // A joined waiter counts as a hit (Open Question 2 resolution,
            // SPEC_FULL.md §8): it never performed its own load.
            self.metrics.record_hit();
        }
        result
    }

    /// `get` with a `batch_loader` (spec §4.7): on miss, enroll on the
    /// `BatchCoalescer` instead of loading unary. Still goes through
    /// `SingleFlight` first so repeated misses on the *same* key collapse
    /// before ever reaching the batch (spec §2 control-flow step 2).
    ///
    /// `use_cache = false` has the same bypass semantics as `get_with`.
    pub async fn get_with_batch(
        &self,
        key: K,
        batch_loader: Arc<dyn BatchLoader<K, V>>,
        ttl: Ttl,
        use_cache: bool,
    ) -> LoadOutcome<V> {
        if use_cache {
            if let Some(v) = self.get(&key).await {
                return Ok(v);
            }
        }

        let batches = self.batches.clone();
        let (result, is_leader) = self
            .inflight
            .run(key.clone(), move || async move {
                let rx = batches.enroll(batch_loader, key, ttl).await;
                match rx.await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CacheError::LoadTaskFailed(
                        "batch flush task dropped its sender".to_string(),
                    )),
                }
            })
            .await;

        if is_leader {
            self.metrics.record_load();
            // The batch's `on_success` callback already inserted
            // `(key, value)` with this exact `ttl` before replying on the
            // oneshot channel that `result` came from — no second insert
            // needed, and none would be safe to race against it.
        } else if result.is_ok() {
            self.metrics.record_hit();
        }
        result
    }

    /// Insert/overwrite with the given TTL (spec §4.7's `set`). Touches to
    /// MRU; may trigger eviction. A `Ttl` resolving to "do not store"
    /// (non-positive TTL, spec §4.4) is a silent no-op here — callers that
    /// need the value still get it from the loader's return value, which is
    /// the case that matters (the caller never sees this method's return).
    pub async fn set(&self, key: K, value: V, ttl: Ttl) {
        self.insert(key, value, ttl).await;
    }

    async fn insert(&self, key: K, value: V, ttl: Ttl) {
        let Some(resolved_ttl) = ttl.resolve(self.config.default_ttl) else {
            return;
        };
        let now = self.clock.now();
        let entry = Entry::new(value, now, resolved_ttl);
        let mut state = self.state.lock().await;
        state.insert(key, entry, &self.metrics);
        state.sweep_expired(now);
    }

    /// Remove an entry if present (spec §4.7's `delete`). Does not cancel
    /// an in-flight load for this key — that load, on completion, still
    /// inserts and wakes its waiters; the caller may delete again
    /// afterwards if last-write-wins is required (spec §5).
    pub async fn delete(&self, key: &K) -> bool {
        self.state.lock().await.delete(key).is_some()
    }

    /// Drop all entries. Does not abort in-flight loads or batches, and
    /// does not zero metrics (spec §4.7, §5).
    pub async fn clear(&self) {
        self.state.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.is_empty()
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// For each `(key, loader)` pair, load via `SingleFlight` (so a
    /// concurrent `get` for the same key joins) if the key is absent, then
    /// `set` with the default TTL. Errors are aggregated, not fatal to the
    /// remaining entries (spec §4.7).
    pub async fn warmup(&self, entries: Vec<(K, BoxLoadFn<V>)>) -> WarmupReport<K> {
        let mut report = WarmupReport {
            loaded: 0,
            skipped_present: 0,
            errors: Vec::new(),
        };
        for (key, loader) in entries {
            if self.get(&key).await.is_some() {
                report.skipped_present += 1;
                continue;
            }
            match self
                .get_with(key.clone(), move || loader(), Ttl::Default, true)
                .await
            {
                Ok(_) => report.loaded += 1,
                Err(e) => report.errors.push((key, e)),
            }
        }
        report
    }
}

/// Boxed unary loader used by `warmup` to hold heterogeneous per-key
/// closures in a single `Vec` (each closure has a distinct anonymous type,
/// so a generic `F` parameter can't name them all at once). Also reused at
/// the decorator boundary (`decorator.rs`), which is similarly erased.
pub type BoxLoadFn<V> = Box<dyn FnOnce() -> BoxFuture<'static, LoadOutcome<V>> + Send>;
