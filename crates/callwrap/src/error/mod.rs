//! Error types shared by every component
//!
//! # Error Handling Architecture
//!
//! 1. **`CallError<E>`**: what a caller of a decorated function sees. It is
//!    either the wrapped function's own error (`Operation`) passed through
//!    unchanged, or one of the failures raised by a component: validation,
//!    rate limiting, an open circuit, or exhausted retries.
//!
//! 2. **`ErrorKind`**: a tagged enumeration of those variants. Retriers and
//!    circuit breakers decide what to intercept by matching on kinds through
//!    a [`Classifier`], never by inspecting concrete types at runtime.
//!
//! 3. **`ErrorClassification` trait**: the standard interface for classifying
//!    errors by retryability and severity. Implemented for `CallError<E>`
//!    whenever the wrapped function's error implements it too.
//!
//! | Raised by | Variant | Kind |
//! |-----------|---------|------|
//! | Input validator | `Validation` | `ErrorKind::Validation` |
//! | Rate limiter | `RateLimitExceeded` | `ErrorKind::RateLimited` |
//! | Circuit breaker | `CircuitOpen` | `ErrorKind::CircuitOpen` |
//! | Retrier | `RetryExhausted` | `ErrorKind::RetryExhausted` |
//! | Wrapped function | `Operation` | `ErrorKind::Operation` |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::validation::ValidationError;

/// Bound satisfied by any error a wrapped function may return
pub trait OperationError: std::error::Error + Send + Sync + 'static {}

impl<T> OperationError for T where T: std::error::Error + Send + Sync + 'static {}

/// Result type for decorated calls
pub type CallResult<T, E> = Result<T, CallError<E>>;

/// Errors surfaced by a decorated call
///
/// Generic over the wrapped function's own error type `E`, which is carried
/// unchanged in [`CallError::Operation`].
#[derive(Debug)]
pub enum CallError<E>
where
    E: OperationError,
{
    /// An argument failed its predicate before the function ran
    Validation(ValidationError),

    /// The sliding window already holds `max_calls` admissions
    RateLimitExceeded { max_calls: usize, period: Duration, retry_after: Duration },

    /// The circuit breaker rejected the call without invoking the function
    CircuitOpen { retry_after: Duration },

    /// Every attempt failed with a retryable error
    ///
    /// The last failure is reachable through `source()` and
    /// [`CallError::root_cause`].
    RetryExhausted {
        attempts: u32,
        source: Box<CallError<E>>,
    },

    /// The wrapped function failed
    Operation(E),
}

// `Display`/`Error` are implemented by hand: a derived impl would bound on
// `Box<CallError<E>>: Error`, which is self-referential and never resolves.
impl<E: OperationError> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => fmt::Display::fmt(e, f),
            Self::RateLimitExceeded { max_calls, period, retry_after } => write!(
                f,
                "Rate limit exceeded: {max_calls} calls per {period:?}, retry after {retry_after:?}"
            ),
            Self::CircuitOpen { retry_after } => {
                write!(f, "Circuit breaker is open, retry after {retry_after:?}")
            }
            Self::RetryExhausted { attempts, .. } => {
                write!(f, "All retry attempts exhausted after {attempts} tries")
            }
            Self::Operation(e) => write!(f, "Operation failed: {e}"),
        }
    }
}

impl<E: OperationError> std::error::Error for CallError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Validation(e) => std::error::Error::source(e),
            Self::RateLimitExceeded { .. } | Self::CircuitOpen { .. } => None,
            Self::RetryExhausted { source, .. } => Some(&**source),
            Self::Operation(e) => Some(e),
        }
    }
}

impl<E: OperationError> From<ValidationError> for CallError<E> {
    fn from(source: ValidationError) -> Self {
        Self::Validation(source)
    }
}

impl<E: OperationError> CallError<E> {
    /// The tag used for structural classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimited,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::Operation(_) => ErrorKind::Operation,
        }
    }

    /// Check the kind of this error
    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }

    /// The wrapped function's error, if this is (or exhausted retries of) one
    pub fn operation(&self) -> Option<&E> {
        match self.root_cause() {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Consume and return the wrapped function's error, if any
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::RetryExhausted { source, .. } => source.into_operation(),
            _ => None,
        }
    }

    /// Unwrap nested `RetryExhausted` layers down to the last real failure
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::RetryExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Tag for each [`CallError`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// Input validation failed
    Validation,
    /// Rate limit exceeded
    RateLimited,
    /// Circuit breaker open
    CircuitOpen,
    /// Retries exhausted
    RetryExhausted,
    /// The wrapped function's own error
    Operation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::RetryExhausted => write!(f, "retry_exhausted"),
            Self::Operation => write!(f, "operation"),
        }
    }
}

/// Configuration validation and loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to read configuration from {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse {format} configuration: {message}")]
    Parse { format: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

//==============================================================================
// Classification
//==============================================================================

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again: rate limiting, an open circuit, temporary unavailability.
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl<E> ErrorClassification for CallError<E>
where
    E: OperationError + ErrorClassification,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::RetryExhausted { .. } => false,
            Self::RateLimitExceeded { .. } | Self::CircuitOpen { .. } => true,
            Self::Operation(e) => e.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Validation(_) | Self::RetryExhausted { .. } => ErrorSeverity::Error,
            Self::RateLimitExceeded { .. } | Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::Operation(e) => e.severity(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } | Self::CircuitOpen { retry_after } => {
                Some(*retry_after)
            }
            Self::Operation(e) => e.retry_after(),
            Self::Validation(_) | Self::RetryExhausted { .. } => None,
        }
    }
}

type Predicate<E> = dyn Fn(&CallError<E>) -> bool + Send + Sync;

/// Decides which failures a retrier retries or a circuit breaker counts
///
/// # Examples
///
/// ```
/// use std::io;
///
/// use callwrap::{CallError, Classifier, ErrorKind};
///
/// let classifier: Classifier<io::Error> =
///     Classifier::operation(|e: &io::Error| e.kind() == io::ErrorKind::ConnectionRefused)
///         .or(Classifier::kinds([ErrorKind::RateLimited]));
///
/// let refused = CallError::Operation(io::Error::from(io::ErrorKind::ConnectionRefused));
/// assert!(classifier.matches(&refused));
/// ```
pub struct Classifier<E: OperationError> {
    predicate: Arc<Predicate<E>>,
    label: Arc<str>,
}

impl<E: OperationError> Classifier<E> {
    /// Match every failure
    pub fn any() -> Self {
        Self { predicate: Arc::new(|_: &CallError<E>| true), label: Arc::from("any") }
    }

    /// Match nothing
    pub fn none() -> Self {
        Self { predicate: Arc::new(|_: &CallError<E>| false), label: Arc::from("none") }
    }

    /// Match failures whose kind is in `kinds`
    pub fn kinds(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        let kinds: Vec<ErrorKind> = kinds.into_iter().collect();
        let label = format!("kinds{kinds:?}");
        Self {
            predicate: Arc::new(move |e: &CallError<E>| kinds.contains(&e.kind())),
            label: Arc::from(label),
        }
    }

    /// Match the wrapped function's own errors for which `predicate` holds
    pub fn operation<F>(predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(move |e: &CallError<E>| {
                matches!(e, CallError::Operation(inner) if predicate(inner))
            }),
            label: Arc::from("operation"),
        }
    }

    /// Arbitrary predicate over the full error
    pub fn from_fn<F>(predicate: F) -> Self
    where
        F: Fn(&CallError<E>) -> bool + Send + Sync + 'static,
    {
        Self { predicate: Arc::new(predicate), label: Arc::from("custom") }
    }

    /// Match when either classifier matches
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        let label = format!("{} | {}", self.label, other.label);
        let (a, b) = (self.predicate, other.predicate);
        Self {
            predicate: Arc::new(move |e: &CallError<E>| a(e) || b(e)),
            label: Arc::from(label),
        }
    }

    /// Does this classifier select `error`?
    pub fn matches(&self, error: &CallError<E>) -> bool {
        (self.predicate)(error)
    }
}

impl<E> Classifier<E>
where
    E: OperationError + ErrorClassification,
{
    /// Match errors reporting themselves as retryable
    pub fn transient() -> Self {
        Self {
            predicate: Arc::new(|e: &CallError<E>| e.is_retryable()),
            label: Arc::from("transient"),
        }
    }
}

impl<E: OperationError> Clone for Classifier<E> {
    fn clone(&self) -> Self {
        Self { predicate: Arc::clone(&self.predicate), label: Arc::clone(&self.label) }
    }
}

impl<E: OperationError> Default for Classifier<E> {
    fn default() -> Self {
        Self::any()
    }
}

impl<E: OperationError> fmt::Debug for Classifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Classifier").field(&self.label).finish()
    }
}
