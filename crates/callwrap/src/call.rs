//! The arguments of one invocation
//!
//! A [`CallSignature`] carries the positional and keyword arguments a caller
//! passed to a decorated function. It is opaque to every component except the
//! input validator (which looks up named parameters) and the call logger
//! (which renders it). Nothing in the chain mutates it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Positional and keyword arguments of a single call
///
/// Keyword arguments are kept in a `BTreeMap`, so two signatures built with
/// the same keywords in a different order are equal and serialize
/// identically.
///
/// # Examples
///
/// ```
/// use callwrap::CallSignature;
///
/// let call = CallSignature::new().arg(5).kwarg("verbose", true);
/// assert_eq!(call.positional().len(), 1);
/// assert_eq!(call.keyword("verbose"), Some(&serde_json::json!(true)));
/// ```
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallSignature {
    #[serde(rename = "args")]
    positional: Vec<Value>,
    #[serde(rename = "kwargs")]
    keyword: BTreeMap<String, Value>,
    #[serde(skip)]
    parameters: Option<Arc<[String]>>,
}

impl CallSignature {
    /// Create an empty signature
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument
    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    /// Declare the parameter names of the called function
    ///
    /// Used to resolve positional arguments by name. Pipelines set this
    /// automatically from [`crate::PipelineBuilder::parameters`].
    #[must_use]
    pub fn with_parameters(mut self, parameters: Arc<[String]>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub(crate) fn bind_parameters(&mut self, parameters: &Arc<[String]>) {
        if self.parameters.is_none() && !parameters.is_empty() {
            self.parameters = Some(Arc::clone(parameters));
        }
    }

    /// Positional arguments in call order
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// All keyword arguments
    pub fn keywords(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    /// A keyword argument by name
    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    /// Resolve a named parameter
    ///
    /// Keyword arguments win; otherwise the positional slot matching the
    /// declared parameter name is returned.
    pub fn argument(&self, name: &str) -> Option<&Value> {
        if let Some(value) = self.keyword.get(name) {
            return Some(value);
        }
        let index = self.parameters.as_ref()?.iter().position(|p| p == name)?;
        self.positional.get(index)
    }

    /// Resolve a named parameter and deserialize it
    ///
    /// Returns `None` when the parameter is absent or has the wrong shape.
    pub fn typed<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.argument(name).and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// Deserialize a positional argument
    pub fn typed_at<T: DeserializeOwned>(&self, index: usize) -> Option<T> {
        self.positional.get(index).and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

impl PartialEq for CallSignature {
    fn eq(&self, other: &Self) -> bool {
        self.positional == other.positional && self.keyword == other.keyword
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "args=[")?;
        for (i, value) in self.positional.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, "], kwargs={{")?;
        for (i, (name, value)) in self.keyword.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_keyword_order_does_not_matter() {
        let a = CallSignature::new().kwarg("a", 1).kwarg("b", 2);
        let b = CallSignature::new().kwarg("b", 2).kwarg("a", 1);

        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).expect("serializable"),
            serde_json::to_string(&b).expect("serializable")
        );
    }

    #[test]
    fn test_argument_prefers_keyword() {
        let params: Arc<[String]> = Arc::from(vec!["user_id".to_string()]);
        let call = CallSignature::new().arg(1).kwarg("user_id", 9).with_parameters(params);

        assert_eq!(call.argument("user_id"), Some(&json!(9)));
    }

    #[test]
    fn test_argument_resolves_positional_by_declared_name() {
        let params: Arc<[String]> = Arc::from(vec!["x".to_string(), "y".to_string()]);
        let call = CallSignature::new().arg(3).arg(4).with_parameters(params);

        assert_eq!(call.argument("y"), Some(&json!(4)));
        assert_eq!(call.typed::<i64>("x"), Some(3));
        assert_eq!(call.argument("z"), None);
    }

    #[test]
    fn test_argument_without_declared_names() {
        let call = CallSignature::new().arg(3);
        assert_eq!(call.argument("x"), None);
        assert_eq!(call.typed_at::<i64>(0), Some(3));
    }

    #[test]
    fn test_display() {
        let call = CallSignature::new().arg(1).arg("two").kwarg("k", true);
        assert_eq!(call.to_string(), r#"args=[1, "two"], kwargs={k: true}"#);
    }
}
