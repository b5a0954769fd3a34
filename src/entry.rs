//! Entry (spec §3) and the TTL Index mechanisms (C5, spec §4.4).

use tokio::time::{Duration, Instant};

/// A cache entry. `lru_position` from spec §3 is implicit — membership and
/// order inside `lru_index::LruIndex` *is* the LRU position, there is no
/// separate field for it here.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    pub fn new(value: V, inserted_at: Instant, ttl: Option<Duration>) -> Self {
        Self {
            value,
            inserted_at,
            expires_at: ttl.map(|d| inserted_at + d),
        }
    }

    /// "A lookup at time `t` treats the entry as expired iff
    /// `expires_at <= t`" (spec §3).
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// A per-key TTL override or the configured default. `None` means "use the
/// cache's configured default"; `Never` means "never expire" regardless of
/// any default; `Millis(d)` is an explicit override.
///
/// Spec §4.4: "A non-positive TTL means 'do not cache the computed value'"
/// — that case is not representable here because it isn't an expiry, it's a
/// decision not to create an `Entry` at all; see `Ttl::should_store`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Default,
    Never,
    For(Duration),
    /// Non-positive duration supplied explicitly: the loader still runs and
    /// its value is still returned to the caller, but no `Entry` is stored.
    DoNotStore,
}

impl Ttl {
    pub fn from_duration(d: Duration) -> Self {
        if d.is_zero() {
            Ttl::DoNotStore
        } else {
            Ttl::For(d)
        }
    }

    /// Resolve against the cache's configured default, producing either
    /// "store with this TTL" (`Some(None)` = never, `Some(Some(d))` =
    /// expires after `d`) or "don't store" (`None`).
    pub fn resolve(self, default_ttl: Option<Duration>) -> Option<Option<Duration>> {
        match self {
            Ttl::Default => Some(default_ttl),
            Ttl::Never => Some(None),
            Ttl::For(d) => Some(Some(d)),
            Ttl::DoNotStore => None,
        }
    }
}
