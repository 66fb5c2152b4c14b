//! Core TTL cache implementation
//!
//! Values live for a fixed TTL from the moment they are stored. Expiry is
//! evaluated lazily at lookup time; [`TtlCache::cleanup_expired`] is an
//! optional sweep. An optional entry bound evicts the entry closest to expiry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::config::CacheConfig;
use super::key::CacheKey;
use super::stats::{CacheStats, MetricsCollector};
use crate::call::CallSignature;
use crate::compose::{AsyncNext, Middleware, Next};
use crate::error::{CallResult, ConfigResult, OperationError};
use crate::resilience::{Clock, SystemClock};

/// Entry stored in the cache with its expiry
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

type Entries<V> = HashMap<CacheKey, CacheEntry<V>>;

/// Thread-safe cache of successful results with a fixed time-to-live
///
/// Only successful computations are stored; a failing computation leaves the
/// cache untouched and its error propagates. Concurrent misses for the same
/// key may both compute, and the last one to finish wins.
///
/// Clones share the same entries.
///
/// # Example
/// ```
/// use std::time::Duration;
///
/// use callwrap::cache::{CacheConfig, TtlCache};
///
/// let cache = TtlCache::new(CacheConfig::with_ttl(Duration::from_secs(30)));
/// let value = cache.get_or_compute("answer".into(), || Ok::<_, std::io::Error>(42));
/// assert_eq!(value.ok(), Some(42));
/// assert_eq!(cache.get(&"answer".into()), Some(42));
/// ```
pub struct TtlCache<V, C = SystemClock>
where
    C: Clock,
{
    storage: Arc<Mutex<Entries<V>>>,
    config: CacheConfig,
    metrics: MetricsCollector,
    clock: Arc<C>,
}

impl<V: Clone> TtlCache<V, SystemClock> {
    /// Create a new cache with the given configuration using system clock
    ///
    /// An invalid configuration is replaced by the defaults; use
    /// [`TtlCache::try_new`] to reject it instead.
    pub fn new(config: CacheConfig) -> Self {
        let config = if config.validate().is_ok() { config } else { CacheConfig::default() };
        Self::build(config, SystemClock)
    }

    /// Create a new cache, rejecting an invalid configuration
    pub fn try_new(config: CacheConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<V, C> TtlCache<V, C>
where
    V: Clone,
    C: Clock,
{
    /// Create a new cache with a custom clock (useful for testing)
    pub fn with_clock(config: CacheConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: CacheConfig, clock: C) -> Self {
        Self {
            storage: Arc::new(Mutex::new(HashMap::new())),
            config,
            metrics: MetricsCollector::default(),
            clock: Arc::new(clock),
        }
    }

    /// The configuration in effect
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a live value
    ///
    /// Returns `None` if the key doesn't exist or if the entry has expired; an
    /// expired entry is removed on the way.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let now = self.clock.now();
        let mut storage = self.storage.lock();

        let lookup = storage.get(key).map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        match lookup {
            Some(Some(value)) => {
                self.metrics.record_hit();
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Some(None) => {
                storage.remove(key);
                self.metrics.record_expirations(1);
                self.metrics.record_miss();
                debug!(key = %key, "Cache entry expired");
                None
            }
            None => {
                self.metrics.record_miss();
                debug!(key = %key, "Cache miss");
                None
            }
        }
    }

    /// Store a value with `expires_at = now + ttl`
    ///
    /// If the cache is at capacity, expired entries are purged first and then
    /// the entry closest to expiry is evicted.
    pub fn insert(&self, key: CacheKey, value: V) {
        let now = self.clock.now();
        let mut storage = self.storage.lock();

        if let Some(max_entries) = self.config.max_entries {
            if storage.len() >= max_entries && !storage.contains_key(&key) {
                self.make_room(&mut storage, now, max_entries);
            }
        }

        let expires_at = now.checked_add(self.config.ttl).unwrap_or(now);
        storage.insert(key, CacheEntry { value, expires_at });
        self.metrics.record_insert();
    }

    fn make_room(&self, storage: &mut Entries<V>, now: Instant, max: usize) {
        let before = storage.len();
        storage.retain(|_, entry| entry.is_live(now));
        let purged = before - storage.len();
        if purged > 0 {
            self.metrics.record_expirations(purged);
        }

        if storage.len() >= max {
            let soonest = storage
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.clone());
            if let Some(key) = soonest {
                storage.remove(&key);
                self.metrics.record_eviction();
                debug!(key = %key, "Evicted cache entry closest to expiry");
            }
        }
    }

    /// Return the live value for `key`, computing and storing it on a miss
    ///
    /// `compute` runs without the cache lock held. Its error is returned
    /// unchanged and nothing is stored.
    pub fn get_or_compute<E, F>(&self, key: CacheKey, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Async variant of [`TtlCache::get_or_compute`]
    pub async fn get_or_compute_async<E, F, Fut>(&self, key: CacheKey, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        let value = compute().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Remove a value from the cache
    pub fn invalidate(&self, key: &CacheKey) -> Option<V> {
        self.storage.lock().remove(key).map(|entry| entry.value)
    }

    /// Clear all entries and statistics
    pub fn clear(&self) {
        self.storage.lock().clear();
        self.metrics.reset();
    }

    /// Get the current number of stored entries
    ///
    /// Includes expired entries that have not been looked up or swept yet.
    pub fn len(&self) -> usize {
        self.storage.lock().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut storage = self.storage.lock();

        let before = storage.len();
        storage.retain(|_, entry| entry.is_live(now));
        let removed = before - storage.len();

        if removed > 0 {
            self.metrics.record_expirations(removed);
            debug!(removed, "Removed expired cache entries");
        }
        removed
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot(self.len(), self.config.max_entries)
    }
}

impl<V, C: Clock> Clone for TtlCache<V, C> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<V, C: Clock> fmt::Debug for TtlCache<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("config", &self.config)
            .field("len", &self.storage.lock().len())
            .finish()
    }
}

#[async_trait]
impl<R, E, C> Middleware<R, E> for TtlCache<R, C>
where
    R: Clone + Send + Sync + 'static,
    E: OperationError,
    C: Clock,
{
    fn name(&self) -> &'static str {
        "ttl_cache"
    }

    fn around(&self, call: &CallSignature, next: Next<'_, R, E>) -> CallResult<R, E> {
        match CacheKey::from_call(call) {
            Some(key) => self.get_or_compute(key, || next.run(call)),
            None => next.run(call),
        }
    }

    async fn around_async(
        &self,
        call: &CallSignature,
        next: AsyncNext<'_, R, E>,
    ) -> CallResult<R, E> {
        match CacheKey::from_call(call) {
            Some(key) => self.get_or_compute_async(key, || next.run(call)).await,
            None => next.run(call).await,
        }
    }
}
