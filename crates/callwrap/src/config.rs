//! Resilience configuration loading
//!
//! [`ResilienceConfig`] gathers the configuration of every stateful component
//! in one document. Each section is optional; a missing section means the
//! component is not stacked by [`PipelineBuilder::with_config`].
//!
//! ## Sources
//! 1. TOML or JSON text ([`ResilienceConfig::from_toml_str`],
//!    [`ResilienceConfig::from_json_str`])
//! 2. A file, format detected by extension
//!    ([`ResilienceConfig::load_from_file`])
//! 3. Environment overrides ([`ResilienceConfig::apply_env_overrides`])
//!
//! ## Environment Variables
//! Durations are fractional seconds.
//! - `CALLWRAP_CACHE_TTL`, `CALLWRAP_CACHE_MAX_ENTRIES`
//! - `CALLWRAP_RATE_LIMIT_MAX_CALLS`, `CALLWRAP_RATE_LIMIT_PERIOD`
//! - `CALLWRAP_RETRY_MAX_ATTEMPTS`, `CALLWRAP_RETRY_DELAY`,
//!   `CALLWRAP_RETRY_BACKOFF`, `CALLWRAP_RETRY_MAX_DELAY`
//! - `CALLWRAP_CIRCUIT_BREAKER_FAILURE_THRESHOLD`,
//!   `CALLWRAP_CIRCUIT_BREAKER_RECOVERY_TIMEOUT`
//!
//! Setting a variable for an absent section enables that section with its
//! defaults before applying the override.
//!
//! # Examples
//!
//! ```
//! use callwrap::ResilienceConfig;
//!
//! let config = ResilienceConfig::from_toml_str(
//!     r#"
//!     [retry]
//!     max_attempts = 4
//!     delay = 0.5
//!
//!     [cache]
//!     ttl = 30
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.retry.unwrap().max_attempts, 4);
//! assert!(config.rate_limit.is_none());
//! ```

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::{CacheConfig, TtlCache};
use crate::compose::PipelineBuilder;
use crate::error::{ConfigError, ConfigResult, OperationError};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, Clock, RateLimitConfig, RateLimiter, Retrier,
    RetryConfig, SystemClock,
};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "CALLWRAP_";

/// Configuration of every stateful component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceConfig {
    /// TTL cache (innermost)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
    /// Sliding-window rate limiter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitConfig>,
    /// Retrier (outermost)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Circuit breaker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl ResilienceConfig {
    /// Parse a TOML document
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "TOML", message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "JSON", message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a `.toml` or `.json` file
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading resilience configuration from file");

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        match path.extension().and_then(|e| e.to_str()).unwrap_or("json") {
            "toml" => Self::from_toml_str(&contents),
            "json" => Self::from_json_str(&contents),
            other => Err(ConfigError::Parse {
                format: "unknown",
                message: format!("Unsupported config format: {other}"),
            }),
        }
    }

    /// Apply `CALLWRAP_*` environment variables on top of this configuration
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`, keyed by full variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Overrides { lookup };

        if let Some(ttl) = env.seconds("CACHE_TTL")? {
            self.cache.get_or_insert_with(CacheConfig::default).ttl = ttl;
        }
        if let Some(max_entries) = env.parse::<usize>("CACHE_MAX_ENTRIES")? {
            self.cache.get_or_insert_with(CacheConfig::default).max_entries = Some(max_entries);
        }

        if let Some(max_calls) = env.parse::<usize>("RATE_LIMIT_MAX_CALLS")? {
            self.rate_limit.get_or_insert_with(RateLimitConfig::default).max_calls = max_calls;
        }
        if let Some(period) = env.seconds("RATE_LIMIT_PERIOD")? {
            self.rate_limit.get_or_insert_with(RateLimitConfig::default).period = period;
        }

        if let Some(attempts) = env.parse::<u32>("RETRY_MAX_ATTEMPTS")? {
            self.retry.get_or_insert_with(RetryConfig::default).max_attempts = attempts;
        }
        if let Some(delay) = env.seconds("RETRY_DELAY")? {
            self.retry.get_or_insert_with(RetryConfig::default).delay = delay;
        }
        if let Some(backoff) = env.parse::<f64>("RETRY_BACKOFF")? {
            self.retry.get_or_insert_with(RetryConfig::default).backoff = backoff;
        }
        if let Some(cap) = env.seconds("RETRY_MAX_DELAY")? {
            self.retry.get_or_insert_with(RetryConfig::default).max_delay = Some(cap);
        }

        if let Some(threshold) = env.parse::<u32>("CIRCUIT_BREAKER_FAILURE_THRESHOLD")? {
            self.circuit_breaker
                .get_or_insert_with(CircuitBreakerConfig::default)
                .failure_threshold = threshold;
        }
        if let Some(timeout) = env.seconds("CIRCUIT_BREAKER_RECOVERY_TIMEOUT")? {
            self.circuit_breaker
                .get_or_insert_with(CircuitBreakerConfig::default)
                .recovery_timeout = timeout;
        }

        self.validate()
    }

    /// Validate every present section
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(cache) = &self.cache {
            cache.validate()?;
        }
        if let Some(rate_limit) = &self.rate_limit {
            rate_limit.validate()?;
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(circuit_breaker) = &self.circuit_breaker {
            circuit_breaker.validate()?;
        }
        Ok(())
    }
}

struct Overrides<F> {
    lookup: F,
}

impl<F> Overrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, suffix: &str) -> Option<(String, String)> {
        let key = format!("{ENV_PREFIX}{suffix}");
        let value = (self.lookup)(&key)?;
        debug!(key = %key, "Applying configuration override");
        Some((key, value))
    }

    fn parse<T>(&self, suffix: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.raw(suffix)
            .map(|(key, value)| {
                value
                    .trim()
                    .parse::<T>()
                    .map_err(|e| ConfigError::invalid(format!("Invalid value for {key}: {e}")))
            })
            .transpose()
    }

    fn seconds(&self, suffix: &str) -> ConfigResult<Option<Duration>> {
        let Some(secs) = self.parse::<f64>(suffix)? else {
            return Ok(None);
        };
        Duration::try_from_secs_f64(secs).map(Some).map_err(|e| {
            ConfigError::invalid(format!("Invalid duration for {ENV_PREFIX}{suffix}: {e}"))
        })
    }
}

impl<R, E> PipelineBuilder<R, E>
where
    R: Clone + Send + Sync + 'static,
    E: OperationError,
{
    /// Stack the configured components using the system clock
    ///
    /// Order, outermost first: retrier, circuit breaker, rate limiter, cache.
    /// Layers added before this call stay outside them.
    pub fn with_config(self, config: &ResilienceConfig) -> ConfigResult<Self> {
        self.with_config_and_clock(config, SystemClock)
    }

    /// Stack the configured components sharing `clock`
    pub fn with_config_and_clock<C: Clock>(
        mut self,
        config: &ResilienceConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let clock = Arc::new(clock);

        if let Some(retry) = &config.retry {
            self = self.layer(Retrier::with_clock(retry.clone(), Arc::clone(&clock))?);
        }
        if let Some(breaker) = &config.circuit_breaker {
            self = self.layer(CircuitBreaker::with_clock(breaker.clone(), Arc::clone(&clock))?);
        }
        if let Some(rate_limit) = &config.rate_limit {
            self = self.layer(RateLimiter::with_clock(rate_limit.clone(), Arc::clone(&clock))?);
        }
        if let Some(cache) = &config.cache {
            self = self.layer(TtlCache::<R, _>::with_clock(cache.clone(), Arc::clone(&clock))?);
        }
        Ok(self)
    }
}
