//! Sliding-window rate limiting
//!
//! Admits at most `max_calls` calls within any trailing window of `period`.
//! The window is evaluated at each call from the recorded admission times,
//! not from fixed buckets, so two calls exactly `period` apart are both
//! admissible. Pruning, counting and recording happen under one lock.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::clock::{Clock, SystemClock};
use crate::call::CallSignature;
use crate::compose::{AsyncNext, Middleware, Next};
use crate::error::{CallError, CallResult, ConfigError, ConfigResult, OperationError};
use crate::utils::duration_secs;

/// Configuration for the sliding-window rate limiter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum admissions within one window
    pub max_calls: usize,
    /// Length of the trailing window
    #[serde(with = "duration_secs")]
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_calls: 5, period: Duration::from_secs(60) }
    }
}

impl RateLimitConfig {
    /// Create a new configuration builder
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_calls == 0 {
            return Err(ConfigError::invalid("max_calls must be greater than 0"));
        }
        if self.period.is_zero() {
            return Err(ConfigError::invalid("period must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for RateLimitConfig
#[derive(Debug, Default)]
pub struct RateLimitConfigBuilder {
    config: RateLimitConfig,
}

impl RateLimitConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_calls(mut self, max_calls: usize) -> Self {
        self.config.max_calls = max_calls;
        self
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.config.period = period;
        self
    }

    pub fn build(self) -> ConfigResult<RateLimitConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// A call refused because the window is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limit exceeded: {max_calls} calls per {period:?}, retry after {retry_after:?}")]
pub struct RateLimitRejection {
    pub max_calls: usize,
    pub period: Duration,
    /// Time until the oldest recorded admission leaves the window
    pub retry_after: Duration,
}

impl<E: OperationError> From<RateLimitRejection> for CallError<E> {
    fn from(rejection: RateLimitRejection) -> Self {
        CallError::RateLimitExceeded {
            max_calls: rejection.max_calls,
            period: rejection.period,
            retry_after: rejection.retry_after,
        }
    }
}

/// Sliding-window rate limiter
///
/// Clones share the same window.
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use callwrap::resilience::{RateLimitConfig, RateLimiter};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = RateLimiter::new(RateLimitConfig {
///     max_calls: 2,
///     period: Duration::from_secs(1),
/// })?;
///
/// assert!(limiter.admit().is_ok());
/// assert!(limiter.admit().is_ok());
/// assert!(limiter.admit().is_err());
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct RateLimiter<C: Clock = SystemClock> {
    config: RateLimitConfig,
    admissions: Arc<Mutex<VecDeque<Instant>>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for RateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("recorded", &self.admissions.lock().len())
            .finish()
    }
}

impl<C: Clock> Clone for RateLimiter<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            admissions: Arc::clone(&self.admissions),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl RateLimiter<SystemClock> {
    /// Create a new rate limiter using the system clock
    pub fn new(config: RateLimitConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a new rate limiter with custom clock
    pub fn with_clock(config: RateLimitConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            admissions: Arc::new(Mutex::new(VecDeque::with_capacity(config.max_calls))),
            config,
            clock: Arc::new(clock),
        })
    }

    /// The configuration in effect
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn prune(&self, admissions: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = admissions.front() {
            if now.saturating_duration_since(oldest) >= self.config.period {
                admissions.pop_front();
            } else {
                break;
            }
        }
    }

    /// Try to admit one call, recording it on success
    pub fn admit(&self) -> Result<(), RateLimitRejection> {
        let now = self.clock.now();
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, now);

        if admissions.len() < self.config.max_calls {
            admissions.push_back(now);
            debug!(
                admitted = admissions.len(),
                max_calls = self.config.max_calls,
                "Rate limiter admitted call"
            );
            return Ok(());
        }

        let oldest = admissions.front().copied().unwrap_or(now);
        let retry_after =
            self.config.period.saturating_sub(now.saturating_duration_since(oldest));
        warn!(
            max_calls = self.config.max_calls,
            period = ?self.config.period,
            retry_after = ?retry_after,
            "Rate limit exceeded"
        );
        Err(RateLimitRejection {
            max_calls: self.config.max_calls,
            period: self.config.period,
            retry_after,
        })
    }

    /// Admissions left in the current window
    pub fn remaining(&self) -> usize {
        let now = self.clock.now();
        let mut admissions = self.admissions.lock();
        self.prune(&mut admissions, now);
        self.config.max_calls.saturating_sub(admissions.len())
    }

    /// Forget every recorded admission
    pub fn reset(&self) {
        self.admissions.lock().clear();
    }

    /// Execute a synchronous operation if admitted
    #[instrument(skip(self, operation))]
    pub fn call<F, T, E>(&self, operation: F) -> CallResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: OperationError,
    {
        self.admit()?;
        operation().map_err(CallError::Operation)
    }

    /// Execute an async operation if admitted
    ///
    /// The window is checked before the operation starts; the limiter never
    /// waits for capacity.
    #[instrument(skip(self, operation))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> CallResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: OperationError,
    {
        self.admit()?;
        operation().await.map_err(CallError::Operation)
    }
}

#[async_trait]
impl<R, E, C> Middleware<R, E> for RateLimiter<C>
where
    R: Send + 'static,
    E: OperationError,
    C: Clock,
{
    fn name(&self) -> &'static str {
        "rate_limiter"
    }

    fn around(&self, call: &CallSignature, next: Next<'_, R, E>) -> CallResult<R, E> {
        self.admit()?;
        next.run(call)
    }

    async fn around_async(
        &self,
        call: &CallSignature,
        next: AsyncNext<'_, R, E>,
    ) -> CallResult<R, E> {
        self.admit()?;
        next.run(call).await
    }
}
