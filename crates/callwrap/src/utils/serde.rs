//! Serialization utilities for configuration values
//!
//! Every time knob in a config file (cache TTL, limiter period, retry delay,
//! breaker recovery timeout) is written as fractional seconds.

use std::time::Duration;

use serde::{de, Deserialize, Deserializer, Serializer};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

fn secs_to_duration<E: de::Error>(secs: f64) -> Result<Duration, E> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| E::custom(format!("invalid duration of {secs} seconds")))
}

/// Custom serialization module for Duration as fractional seconds
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use callwrap::utils::duration_secs;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_secs")]
///     timeout: Duration,
/// }
///
/// let parsed: Example = serde_json::from_str(r#"{"timeout": 1.5}"#).unwrap();
/// assert_eq!(parsed.timeout, Duration::from_millis(1500));
/// ```
pub mod duration_secs {
    use super::*;

    /// Serialize a Duration as seconds (f64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    /// Deserialize seconds (f64) into a Duration
    ///
    /// Negative, NaN and overflowing values are rejected.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        secs_to_duration(secs)
    }
}

/// Like [`duration_secs`] for optional fields
pub mod option_duration_secs {
    use super::*;

    /// Serialize an optional Duration as seconds or `None`
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&duration.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize optional seconds into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?.map(secs_to_duration).transpose()
    }
}
