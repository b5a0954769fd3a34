//! LRU Index (C4, spec §4.3) plus the opportunistic TTL sweep (C5, spec
//! §4.4).
//!
//! Wraps [`lru::LruCache`] rather than hand-rolling a linked list + hash map
//! — `embedding_cache.rs::evict_lru` carries a TODO recommending exactly
//! this ("switch to ... a linked-list LRU like the `lru` crate") once a
//! hand-rolled `O(n)` eviction scan stops being good enough, and the same
//! crate is already a dependency of `Agent-Field-SWE-AF` and
//! `harborgrid-justin-caddy`.
//!
//! Capacity is managed explicitly here (spec §4.3's "immediately after any
//! insert that would make `len() > maxsize`, `evict_oldest` is invoked until
//! `len() == maxsize`") rather than leaning on `lru::LruCache`'s own
//! capacity-eviction, so every eviction passes through one counted code
//! path.

use std::hash::Hash;

use lru::LruCache;
use tokio::time::Instant;

use crate::entry::Entry;
use crate::metrics::Metrics;

/// How many expired entries the opportunistic sweep considers per call
/// (spec §4.4: "a bounded number (implementation-chosen, e.g. 8)").
const SWEEP_BUDGET: usize = 8;

/// `maxsize` policy: a fixed cap, or no eviction at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Bounded(usize),
    Unlimited,
}

pub struct LruIndex<K, V> {
    inner: LruCache<K, Entry<V>>,
    capacity: Capacity,
}

impl<K: Hash + Eq + Clone, V> LruIndex<K, V> {
    pub fn new(capacity: Capacity) -> Self {
        let inner = match capacity {
            Capacity::Bounded(n) => LruCache::new(std::num::NonZeroUsize::new(n).expect(
                "Capacity::Bounded(0) must be rejected by CacheConfig::validate before reaching LruIndex",
            )),
            Capacity::Unlimited => LruCache::unbounded(),
        };
        Self { inner, capacity }
    }

    /// Lookup that also promotes to MRU on a hit — `touch` and `lookup` are
    /// the same underlying operation for a present entry (spec §4.3: "`touch`
    /// and `insert` move the key to the 'most recently used' end").
    pub fn lookup_mut(&mut self, key: &K) -> Option<&mut Entry<V>> {
        self.inner.get_mut(key)
    }

    pub fn touch(&mut self, key: &K) {
        self.inner.get_mut(key);
    }

    /// Insert or overwrite, then evict down to capacity. Returns the number
    /// of entries evicted as a result (0 or more; 0 for `Capacity::Unlimited`
    /// or when still under capacity).
    pub fn insert(&mut self, key: K, entry: Entry<V>, metrics: &Metrics) {
        self.inner.put(key, entry);
        if let Capacity::Bounded(max) = self.capacity {
            while self.inner.len() > max {
                if self.inner.pop_lru().is_none() {
                    // spec §7: eviction finding the LRU empty while the
                    // index is non-empty is a fatal invariant violation.
                    assert_eq!(
                        self.inner.len(),
                        0,
                        "LRU index non-empty but pop_lru found nothing"
                    );
                    break;
                }
                metrics.record_eviction();
            }
        }
    }

    pub fn delete(&mut self, key: &K) -> Option<Entry<V>> {
        self.inner.pop(key)
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Bounded, synchronous expired-entry cleanup (spec §4.4): scan up to
    /// [`SWEEP_BUDGET`] entries starting from the LRU end and delete any
    /// that are expired as of `now`. Never a background task — this is
    /// called inline from `set`/`get`.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        // `lru::LruCache::iter` yields most-recently-used first; reverse to
        // start scrutiny at the LRU end as spec §4.4 requires.
        let oldest_first: Vec<K> = self
            .inner
            .iter()
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .take(SWEEP_BUDGET)
            .collect();

        let mut swept = 0;
        for key in oldest_first {
            let expired = self
                .inner
                .peek(&key)
                .map(|e| e.is_expired(now))
                .unwrap_or(false);
            if expired {
                self.inner.pop(&key);
                swept += 1;
            }
        }
        swept
    }

    #[cfg(test)]
    pub fn keys(&self) -> std::collections::HashSet<K> {
        self.inner.iter().map(|(k, _)| k.clone()).collect()
    }
}
