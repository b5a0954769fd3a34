//! Error types for the cache engine.

use std::fmt;
use std::sync::Arc;

/// A type-erased loader/batch-loader failure cause.
///
/// Wrapped in `Arc` so the same cause can be cloned out to every waiter on a
/// failed single-flight slot or flushed batch (spec §4.5, §4.6: "a failed
/// load propagates the same error to every attached waiter").
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the cache engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The unary loader failed. The wrapped cause is preserved and delivered
    /// to every waiter on the failed `SingleFlight` slot. No entry is
    /// stored.
    #[error("loader failed: {0}")]
    Load(Cause),

    /// The batch loader itself failed (raised, or returned a value of
    /// invalid shape). Every waiter on the flushed batch receives it.
    #[error("batch loader failed: {0}")]
    Batch(Cause),

    /// The batch completed but returned no value for this key. Delivered
    /// only to that key's waiter, never to its batch-mates.
    #[error("key absent in batch result")]
    KeyAbsentInBatch,

    /// Construction-time validation failure.
    #[error("invalid cache configuration: {0}")]
    Config(#[from] ConfigError),

    /// The task driving a load panicked or was forcibly aborted. This
    /// indicates a bug in the loader, not a cache invariant violation.
    #[error("load task failed to run to completion: {0}")]
    LoadTaskFailed(String),
}

/// Construction-time configuration validation errors (spec §7).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("maxsize must be positive, got {0}")]
    NonPositiveMaxsize(i64),

    #[error("max_batch_size must be positive, got {0}")]
    NonPositiveMaxBatchSize(i64),
}

/// Wraps an arbitrary loader error into a [`Cause`].
pub fn wrap_cause<E>(err: E) -> Cause
where
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(err)
}

/// A minimal string-based error for callers who don't have a typed loader
/// error handy (e.g. ad-hoc test loaders or `&str` failure messages).
#[derive(Debug, Clone)]
pub struct Message(pub String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message(s)
    }
}
