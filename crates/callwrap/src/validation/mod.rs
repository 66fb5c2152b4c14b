// Input validation - per-parameter predicates checked before a call runs
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub mod predicates;

pub use predicates::JsonType;

use crate::call::CallSignature;
use crate::compose::{AsyncNext, Middleware, Next};
use crate::error::{CallResult, OperationError};

/// Type alias for validation results
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Type alias for a predicate function (clippy::type_complexity)
type PredicateFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// An argument rejected by its predicate
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Validation failed for parameter '{parameter}' with value {value}: {message}")]
pub struct ValidationError {
    /// Name of the offending parameter
    pub parameter: String,
    /// The value that was passed
    pub value: Value,
    /// Description of the predicate that failed
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for one parameter
    pub fn new(parameter: impl Into<String>, value: Value, message: impl Into<String>) -> Self {
        Self { parameter: parameter.into(), value, message: message.into() }
    }
}

/// A named check over one argument value
///
/// Cloning shares the underlying function.
#[derive(Clone)]
pub struct Predicate {
    check: PredicateFn,
    description: Arc<str>,
}

impl Predicate {
    /// Wrap a function with a human readable description
    pub fn new<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self { check: Arc::new(check), description: Arc::from(description.into()) }
    }

    /// Evaluate the predicate
    pub fn test(&self, value: &Value) -> bool {
        (self.check)(value)
    }

    /// What the predicate requires
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.description).finish()
    }
}

impl<F> From<F> for Predicate
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    fn from(check: F) -> Self {
        Self::new("predicate not satisfied", check)
    }
}

/// Checks named arguments before the wrapped function executes
///
/// Rules run in registration order and the first failure wins. Parameters
/// without a rule, and rules whose parameter was not supplied, are skipped.
///
/// # Examples
///
/// ```
/// use callwrap::validation::{predicates, InputValidator};
/// use callwrap::CallSignature;
///
/// let validator = InputValidator::new().rule("user_id", predicates::positive_integer());
///
/// assert!(validator.validate(&CallSignature::new().kwarg("user_id", 5)).is_ok());
/// let err = validator.validate(&CallSignature::new().kwarg("user_id", -1)).unwrap_err();
/// assert_eq!(err.parameter, "user_id");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    rules: Vec<(String, Predicate)>,
}

impl InputValidator {
    /// Create a validator with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate for a parameter
    ///
    /// Registering the same parameter twice keeps both predicates.
    #[must_use]
    pub fn rule(mut self, parameter: impl Into<String>, predicate: impl Into<Predicate>) -> Self {
        self.rules.push((parameter.into(), predicate.into()));
        self
    }

    /// Number of registered rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if no rules are registered
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Names of the checked parameters, in evaluation order
    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(name, _)| name.as_str())
    }

    /// Evaluate every rule against a call
    pub fn validate(&self, call: &CallSignature) -> ValidationResult<()> {
        for (parameter, predicate) in &self.rules {
            let Some(value) = call.argument(parameter) else {
                debug!(parameter = %parameter, "Parameter not supplied, skipping validation");
                continue;
            };
            if !predicate.test(value) {
                warn!(
                    parameter = %parameter,
                    value = %value,
                    requirement = predicate.description(),
                    "Input validation failed"
                );
                return Err(ValidationError::new(
                    parameter.clone(),
                    value.clone(),
                    predicate.description(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<R, E> Middleware<R, E> for InputValidator
where
    R: Send + 'static,
    E: OperationError,
{
    fn name(&self) -> &'static str {
        "input_validator"
    }

    fn around(&self, call: &CallSignature, next: Next<'_, R, E>) -> CallResult<R, E> {
        self.validate(call)?;
        next.run(call)
    }

    async fn around_async(
        &self,
        call: &CallSignature,
        next: AsyncNext<'_, R, E>,
    ) -> CallResult<R, E> {
        self.validate(call)?;
        next.run(call).await
    }
}
