//! Cache keys derived from call arguments

use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::call::CallSignature;

/// Canonical representation of a call's arguments
///
/// Built from the JSON encoding of the positional arguments followed by the
/// keyword arguments sorted by name, so equal arguments give equal keys
/// whatever order the keywords were passed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Use an explicit key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key of a call
    ///
    /// Returns `None` when the arguments cannot be encoded; callers then
    /// bypass the cache instead of failing the call.
    pub fn from_call(call: &CallSignature) -> Option<Self> {
        Self::from_serializable(call)
    }

    /// Derive a key from any serializable value
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Option<Self> {
        match serde_json::to_string(value) {
            Ok(encoded) => Some(Self(encoded)),
            Err(error) => {
                warn!(error = %error, "Failed to derive cache key, bypassing cache");
                None
            }
        }
    }

    /// The encoded key
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}
