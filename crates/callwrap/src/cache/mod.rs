//! TTL cache of successful call results
//!
//! The cache maps a canonical key derived from a call's arguments to the value
//! the wrapped function returned, for a fixed time-to-live.
//!
//! # Features
//!
//! - **Thread-safe**: one `parking_lot::Mutex` guards the entry map
//! - **Lazy expiry**: entries are checked at lookup time, with an optional
//!   [`TtlCache::cleanup_expired`] sweep
//! - **Bounded**: optional `max_entries`, evicting the entry closest to expiry
//! - **Metrics tracking**: hit/miss/insert/eviction/expiration statistics
//! - **Testable**: Clock abstraction for deterministic time-based testing
//!
//! # Examples
//!
//! ## Caching a wrapped function
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use callwrap::cache::{CacheConfig, TtlCache};
//! use callwrap::{CallSignature, Pipeline};
//!
//! let runs = Arc::new(AtomicU32::new(0));
//! let counter = Arc::clone(&runs);
//! let lookup = Pipeline::<String, std::io::Error>::builder("lookup")
//!     .layer(TtlCache::new(CacheConfig::with_ttl(Duration::from_secs(60))))
//!     .wrap(move |call: &CallSignature| {
//!         counter.fetch_add(1, Ordering::SeqCst);
//!         Ok(format!("user {}", call.positional()[0]))
//!     });
//!
//! lookup.invoke(CallSignature::new().arg(7)).unwrap();
//! lookup.invoke(CallSignature::new().arg(7)).unwrap();
//! assert_eq!(runs.load(Ordering::SeqCst), 1);
//! ```
//!
//! ## Cache Statistics
//! ```
//! use std::time::Duration;
//!
//! use callwrap::cache::{CacheConfig, TtlCache};
//!
//! let cache: TtlCache<i32> = TtlCache::new(CacheConfig::with_ttl(Duration::from_secs(60)));
//! cache.insert("a".into(), 1);
//! cache.get(&"a".into());
//! cache.get(&"b".into());
//!
//! let stats = cache.stats();
//! assert_eq!(stats.hits, 1);
//! assert_eq!(stats.misses, 1);
//! assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
//! ```

mod config;
mod core;
mod key;
mod stats;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use self::core::TtlCache;
pub use key::CacheKey;
pub use stats::CacheStats;
