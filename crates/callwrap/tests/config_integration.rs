//! Integration tests for configuration loading
//!
//! Tests file loading in both formats, error reporting, environment
//! overrides and pipelines assembled from a loaded configuration.

use std::io::{self, Write};
use std::time::Duration;

use callwrap::{CallSignature, ConfigError, ErrorKind, MockClock, Pipeline, ResilienceConfig};
use parking_lot::{const_mutex, Mutex};
use tempfile::NamedTempFile;

static ENV_LOCK: Mutex<()> = const_mutex(());

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

/// Validates loading a TOML file with every section.
#[test]
fn test_load_toml_file() -> anyhow::Result<()> {
    let file = write_config(
        ".toml",
        r#"
        [cache]
        ttl = 120
        max_entries = 500

        [rate_limit]
        max_calls = 20
        period = 1

        [retry]
        max_attempts = 5
        delay = 0.25
        backoff = 1.5
        max_delay = 4

        [circuit_breaker]
        failure_threshold = 10
        recovery_timeout = 30
        "#,
    );

    let config = ResilienceConfig::load_from_file(file.path())?;

    let cache = config.cache.expect("cache section");
    assert_eq!(cache.ttl, Duration::from_secs(120));
    assert_eq!(cache.max_entries, Some(500));
    let retry = config.retry.expect("retry section");
    assert_eq!(retry.delay, Duration::from_millis(250));
    assert_eq!(retry.max_delay, Some(Duration::from_secs(4)));
    assert_eq!(config.rate_limit.expect("rate limit section").max_calls, 20);
    assert_eq!(
        config.circuit_breaker.expect("breaker section").recovery_timeout,
        Duration::from_secs(30)
    );
    Ok(())
}

/// Validates loading a JSON file, with omitted fields taking their defaults.
#[test]
fn test_load_json_file_with_defaults() {
    let file = write_config(".json", r#"{"retry": {"max_attempts": 2}, "cache": {}}"#);

    let config = ResilienceConfig::load_from_file(file.path()).expect("valid config file");

    let retry = config.retry.expect("retry section");
    assert_eq!(retry.max_attempts, 2);
    assert_eq!(retry.delay, Duration::from_secs(1));
    assert!((retry.backoff - 2.0).abs() < f64::EPSILON);
    assert_eq!(config.cache.expect("cache section").ttl, Duration::from_secs(60));
    assert!(config.circuit_breaker.is_none());
}

/// Validates the error reported for each kind of loading failure.
#[test]
fn test_load_errors() {
    let missing = ResilienceConfig::load_from_file("/nonexistent/callwrap.toml");
    assert!(matches!(missing, Err(ConfigError::Io { .. })));

    let yaml = write_config(".yaml", "retry: {}");
    let unsupported = ResilienceConfig::load_from_file(yaml.path());
    assert!(matches!(unsupported, Err(ConfigError::Parse { .. })));

    let broken = write_config(".toml", "[retry\nmax_attempts = 3");
    let syntax = ResilienceConfig::load_from_file(broken.path());
    assert!(matches!(syntax, Err(ConfigError::Parse { format: "TOML", .. })));

    let invalid = write_config(".json", r#"{"circuit_breaker": {"failure_threshold": 0}}"#);
    let rejected = ResilienceConfig::load_from_file(invalid.path());
    assert!(matches!(rejected, Err(ConfigError::Invalid { .. })));
}

/// Validates environment overrides on top of a file.
///
/// # Test Steps
/// 1. Load a file configuring only the cache
/// 2. Override the cache TTL and enable the rate limiter from the environment
/// 3. Verify merged values, then clean up the environment
#[test]
fn test_env_overrides() {
    let _guard = ENV_LOCK.lock();
    let file = write_config(".toml", "[cache]\nttl = 5\n");
    let mut config = ResilienceConfig::load_from_file(file.path()).expect("valid config file");

    std::env::set_var("CALLWRAP_CACHE_TTL", "0.5");
    std::env::set_var("CALLWRAP_RATE_LIMIT_MAX_CALLS", "3");
    let result = config.apply_env_overrides();
    std::env::remove_var("CALLWRAP_CACHE_TTL");
    std::env::remove_var("CALLWRAP_RATE_LIMIT_MAX_CALLS");

    result.expect("valid overrides");
    assert_eq!(config.cache.expect("cache section").ttl, Duration::from_millis(500));
    let rate_limit = config.rate_limit.expect("rate limit enabled by override");
    assert_eq!(rate_limit.max_calls, 3);
    assert_eq!(rate_limit.period, Duration::from_secs(60));
}

/// Validates that an invalid override leaves an error, not a broken config.
#[test]
fn test_invalid_env_override() {
    let _guard = ENV_LOCK.lock();
    let mut config = ResilienceConfig::default();

    std::env::set_var("CALLWRAP_CIRCUIT_BREAKER_FAILURE_THRESHOLD", "0");
    let result = config.apply_env_overrides();
    std::env::remove_var("CALLWRAP_CIRCUIT_BREAKER_FAILURE_THRESHOLD");

    assert!(matches!(result, Err(ConfigError::Invalid { .. })));
}

/// Validates a pipeline assembled from a configuration file.
///
/// # Test Steps
/// 1. Configure retry (3 attempts, no delay) and a 2-call rate limit
/// 2. The wrapped function always fails
/// 3. The retrier consumes the limiter's window: the third attempt is
///    rejected by the limiter and the rejection ends in `RetryExhausted`
#[test]
fn test_pipeline_from_file() {
    let file = write_config(
        ".toml",
        r#"
        [retry]
        max_attempts = 3
        delay = 0

        [rate_limit]
        max_calls = 2
        period = 60
        "#,
    );
    let config = ResilienceConfig::load_from_file(file.path()).expect("valid config file");
    let clock = MockClock::new();

    let fetch = Pipeline::<u32, io::Error>::builder("fetch")
        .with_config_and_clock(&config, clock.clone())
        .expect("valid config")
        .wrap(|_| Err(io::Error::other("unavailable")));

    let error = fetch.invoke(CallSignature::new()).expect_err("all attempts fail");

    assert_eq!(error.kind(), ErrorKind::RetryExhausted);
    assert_eq!(error.root_cause().kind(), ErrorKind::RateLimited);
    assert!(clock.sleeps().is_empty());
}
