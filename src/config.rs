//! Cache configuration (ambient — ties to `src/config.rs`'s validating
//! `*Config::from_env` constructors, adapted to purely programmatic
//! construction since this is a library, not a bootstrapped process).

use tokio::time::Duration;

use crate::error::ConfigError;
use crate::lru_index::Capacity;

/// Parameters and defaults from spec §6.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Max entries; `Capacity::Unlimited` disables eviction. Default: 128.
    pub maxsize: Capacity,
    /// `None` disables expiry by default. Default: none.
    pub default_ttl: Option<Duration>,
    /// Coalescing window. Default: 5ms.
    pub batch_window: Duration,
    /// Hard cap per batch. Default: 100.
    pub max_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            maxsize: Capacity::Bounded(128),
            default_ttl: None,
            batch_window: Duration::from_millis(5),
            max_batch_size: 100,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if let Capacity::Bounded(n) = self.maxsize {
            if n == 0 {
                return Err(ConfigError::NonPositiveMaxsize(0));
            }
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::NonPositiveMaxBatchSize(0));
        }
        Ok(())
    }
}

/// Validating builder, mirroring `config.rs`'s `Config::from_env()
/// -> Result<Self, ConfigError>` discipline.
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn maxsize(mut self, maxsize: Capacity) -> Self {
        self.config.maxsize = maxsize;
        self
    }

    pub fn default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn batch_window(mut self, window: Duration) -> Self {
        self.config.batch_window = window;
        self
    }

    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.config.max_batch_size = n;
        self
    }

    pub fn build(self) -> Result<CacheConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
