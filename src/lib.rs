//! In-process, application-layer cache for workloads dominated by
//! concurrent, duplicated, expensive asynchronous loads (database reads,
//! remote RPCs).
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                          Cache<K, V>                        │
//! │                                                              │
//! │  get(key) ──► LRU+TTL lookup ──► hit? return (touch MRU)    │
//! │                      │                                       │
//! │                     miss                                     │
//! │                      │                                       │
//! │          ┌───────────┴────────────┐                          │
//! │   unary loader               batch_loader                    │
//! │          │                        │                          │
//! │    SingleFlight               BatchCoalescer                 │
//! │  (collapse same-key)       (collapse cross-key,               │
//! │                              flush at deadline or              │
//! │                              max_batch_size)                  │
//! │          └───────────┬────────────┘                          │
//! │                 insert + wake waiters                        │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Converts bursts of redundant concurrent work for the same key into a
//! single underlying load (single-flight / thundering-herd protection),
//! amortises related-but-distinct-key loads across a short temporal window
//! (the DataLoader batch pattern), and supports time- and capacity-bounded
//! retention.
//!
//! Out of scope (see `SPEC_FULL.md` §1): persistence across restarts,
//! cross-process coherence, distributed invalidation, byte-bounded memory,
//! and transactional multi-key reads.

pub mod batch;
pub mod cache;
pub mod clock;
pub mod config;
pub mod decorator;
pub mod entry;
pub mod error;
pub mod key;
pub mod lru_index;
pub mod metrics;
pub mod single_flight;

pub use batch::{BatchLoader, BatchResult};
pub use cache::{BoxLoadFn, Cache, WarmupReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheConfigBuilder};
pub use decorator::{LruCached, TtlCached};
pub use entry::{Entry, Ttl};
pub use error::{CacheError, Cause, ConfigError, Message};
pub use key::{derive_key, ByIdentity, CacheKey, Encodable, Mapping, UnorderedSet};
pub use lru_index::Capacity;
pub use metrics::{Metrics, MetricsSnapshot};
