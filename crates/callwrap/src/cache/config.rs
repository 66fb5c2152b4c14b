//! Cache configuration types and builder patterns

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::utils::duration_secs;

/// Configuration for the TTL cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live applied to every stored value
    #[serde(with = "duration_secs")]
    pub ttl: Duration,

    /// Maximum number of entries (None = unlimited)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(60), max_entries: None }
    }
}

impl CacheConfig {
    /// Create a new configuration builder
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Quick preset for an unbounded cache with the given TTL
    ///
    /// # Example
    /// ```
    /// use std::time::Duration;
    ///
    /// use callwrap::cache::CacheConfig;
    ///
    /// let config = CacheConfig::with_ttl(Duration::from_secs(300));
    /// assert_eq!(config.max_entries, None);
    /// ```
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl, max_entries: None }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.ttl.is_zero() {
            return Err(ConfigError::invalid("ttl must be greater than zero"));
        }
        if self.max_entries == Some(0) {
            return Err(ConfigError::invalid("max_entries must be greater than 0 when set"));
        }
        Ok(())
    }
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Set the time-to-live
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl = ttl;
        self
    }

    /// Bound the number of stored entries
    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = Some(max);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> ConfigResult<CacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
