//! Explicit composition of call-wrapping middleware
//!
//! Every component (timer, call logger, cache, rate limiter, retrier, circuit
//! breaker, input validator) implements [`Middleware`]. A [`PipelineBuilder`]
//! stacks them in order, first added being outermost, around either a
//! blocking function ([`Decorated`]) or an async one ([`AsyncDecorated`]).
//!
//! On a call the outermost middleware runs its pre-call work and hands control
//! to the next one through a [`Next`] / [`AsyncNext`] continuation, down to the
//! wrapped function; results and errors travel back out through each layer's
//! post-call work exactly once. A layer may call its continuation several
//! times (retrier) or not at all (cache hit, open circuit, rejected input).
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use callwrap::{CallSignature, MemorySink, Pipeline, Timer, TtlCache, CacheConfig};
//!
//! let sink = MemorySink::new();
//! let square = Pipeline::<i64, std::io::Error>::builder("square")
//!     .parameters(["n"])
//!     .layer(Timer::new(sink.clone()))
//!     .layer(TtlCache::new(CacheConfig::with_ttl(Duration::from_secs(30))))
//!     .wrap(|call: &CallSignature| Ok(call.typed::<i64>("n").unwrap_or(0).pow(2)));
//!
//! assert_eq!(square.invoke(CallSignature::new().arg(7)).ok(), Some(49));
//! assert_eq!(sink.records().len(), 1);
//! ```

mod handler;
#[cfg(feature = "tower")]
mod service;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
pub use handler::{AsyncHandler, SyncHandler};
use tracing::instrument;

use crate::call::CallSignature;
use crate::error::{CallError, CallResult, OperationError};

/// A function-to-function transform around one call
///
/// `around` serves blocking callers and `around_async` cooperative ones; an
/// implementation must give both paths the same semantics for the same
/// sequence of calls and clock readings.
#[async_trait]
pub trait Middleware<R, E: OperationError>: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Wrap a blocking call
    fn around(&self, call: &CallSignature, next: Next<'_, R, E>) -> CallResult<R, E>;

    /// Wrap a cooperative call
    async fn around_async(&self, call: &CallSignature, next: AsyncNext<'_, R, E>)
        -> CallResult<R, E>;
}

type Layers<R, E> = [Arc<dyn Middleware<R, E>>];

/// Continuation running the rest of a blocking chain
pub struct Next<'a, R, E: OperationError> {
    function: &'a str,
    chain: &'a Layers<R, E>,
    handler: &'a SyncHandler<R, E>,
}

impl<R, E: OperationError> Clone for Next<'_, R, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R, E: OperationError> Copy for Next<'_, R, E> {}

impl<'a, R, E> Next<'a, R, E>
where
    R: Send + 'static,
    E: OperationError,
{
    /// Name of the wrapped function
    pub fn function(&self) -> &'a str {
        self.function
    }

    /// Run the remaining middleware and the wrapped function
    pub fn run(self, call: &CallSignature) -> CallResult<R, E> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.around(call, Next { function: self.function, chain: rest, ..self })
            }
            None => (self.handler)(call).map_err(CallError::Operation),
        }
    }
}

/// Continuation running the rest of a cooperative chain
pub struct AsyncNext<'a, R, E: OperationError> {
    function: &'a str,
    chain: &'a Layers<R, E>,
    handler: &'a AsyncHandler<R, E>,
}

impl<R, E: OperationError> Clone for AsyncNext<'_, R, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R, E: OperationError> Copy for AsyncNext<'_, R, E> {}

impl<'a, R, E> AsyncNext<'a, R, E>
where
    R: Send + 'static,
    E: OperationError,
{
    /// Name of the wrapped function
    pub fn function(&self) -> &'a str {
        self.function
    }

    /// Run the remaining middleware and the wrapped function
    pub fn run(self, call: &'a CallSignature) -> BoxFuture<'a, CallResult<R, E>> {
        match self.chain.split_first() {
            Some((head, rest)) => {
                head.around_async(call, AsyncNext { function: self.function, chain: rest, ..self })
            }
            None => {
                let fut = (self.handler)(call.clone());
                async move { fut.await.map_err(CallError::Operation) }.boxed()
            }
        }
    }
}

/// Namespace for [`PipelineBuilder`] construction
pub struct Pipeline<R, E>(std::marker::PhantomData<fn() -> (R, E)>);

impl<R, E> Pipeline<R, E>
where
    R: Send + 'static,
    E: OperationError,
{
    /// Start a pipeline for the function called `name`
    pub fn builder(name: impl Into<String>) -> PipelineBuilder<R, E> {
        PipelineBuilder::new(name)
    }
}

/// Fluent builder stacking middleware around one function
pub struct PipelineBuilder<R, E>
where
    E: OperationError,
{
    name: String,
    parameters: Vec<String>,
    layers: Vec<Arc<dyn Middleware<R, E>>>,
}

impl<R, E> PipelineBuilder<R, E>
where
    R: Send + 'static,
    E: OperationError,
{
    /// Create a builder for the function called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), parameters: Vec::new(), layers: Vec::new() }
    }

    /// Declare the wrapped function's parameter names, in positional order
    #[must_use]
    pub fn parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = names.into_iter().map(Into::into).collect();
        self
    }

    /// Add a middleware inside every layer added before it
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware<R, E> + 'static,
    {
        self.layers.push(Arc::new(middleware));
        self
    }

    /// Add an already shared middleware
    #[must_use]
    pub fn layer_shared(mut self, middleware: Arc<dyn Middleware<R, E>>) -> Self {
        self.layers.push(middleware);
        self
    }

    /// Names of the layers added so far, outermost first
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    fn into_chain(self) -> Chain<R, E> {
        Chain {
            name: Arc::from(self.name),
            parameters: Arc::from(self.parameters),
            layers: Arc::from(self.layers),
        }
    }

    /// Wrap a blocking function
    pub fn wrap<F>(self, function: F) -> Decorated<R, E>
    where
        F: Fn(&CallSignature) -> Result<R, E> + Send + Sync + 'static,
    {
        Decorated { chain: self.into_chain(), handler: Arc::new(function) }
    }

    /// Wrap an async function
    pub fn wrap_async<F, Fut>(self, function: F) -> AsyncDecorated<R, E>
    where
        F: Fn(CallSignature) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let handler = move |call: CallSignature| function(call).boxed();
        AsyncDecorated { chain: self.into_chain(), handler: Arc::new(handler) }
    }
}

struct Chain<R, E: OperationError> {
    name: Arc<str>,
    parameters: Arc<[String]>,
    layers: Arc<Layers<R, E>>,
}

impl<R, E: OperationError> Clone for Chain<R, E> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            parameters: Arc::clone(&self.parameters),
            layers: Arc::clone(&self.layers),
        }
    }
}

impl<R, E: OperationError> Chain<R, E> {
    fn describe(&self, f: &mut fmt::Formatter<'_>, kind: &str) -> fmt::Result {
        let names: Vec<&'static str> = self.layers.iter().map(|layer| layer.name()).collect();
        f.debug_struct(kind).field("function", &self.name).field("layers", &names).finish()
    }
}

/// A blocking function with its middleware stack
///
/// Clones share the same middleware instances, and therefore the same cache,
/// limiter and breaker state.
pub struct Decorated<R, E: OperationError> {
    chain: Chain<R, E>,
    handler: Arc<SyncHandler<R, E>>,
}

impl<R, E> Decorated<R, E>
where
    R: Send + 'static,
    E: OperationError,
{
    /// Name of the wrapped function
    pub fn name(&self) -> &str {
        &self.chain.name
    }

    /// Invoke the outermost layer
    #[instrument(level = "debug", skip_all, fields(function = %self.chain.name))]
    pub fn invoke(&self, mut call: CallSignature) -> CallResult<R, E> {
        call.bind_parameters(&self.chain.parameters);
        let next = Next {
            function: &self.chain.name,
            chain: &self.chain.layers,
            handler: self.handler.as_ref(),
        };
        next.run(&call)
    }
}

impl<R, E: OperationError> Clone for Decorated<R, E> {
    fn clone(&self) -> Self {
        Self { chain: self.chain.clone(), handler: Arc::clone(&self.handler) }
    }
}

impl<R, E: OperationError> fmt::Debug for Decorated<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.chain.describe(f, "Decorated")
    }
}

/// An async function with its middleware stack
pub struct AsyncDecorated<R, E: OperationError> {
    chain: Chain<R, E>,
    handler: Arc<AsyncHandler<R, E>>,
}

impl<R, E> AsyncDecorated<R, E>
where
    R: Send + 'static,
    E: OperationError,
{
    /// Name of the wrapped function
    pub fn name(&self) -> &str {
        &self.chain.name
    }

    /// Invoke the outermost layer
    #[instrument(level = "debug", skip_all, fields(function = %self.chain.name))]
    pub async fn invoke(&self, mut call: CallSignature) -> CallResult<R, E> {
        call.bind_parameters(&self.chain.parameters);
        let next = AsyncNext {
            function: &self.chain.name,
            chain: &self.chain.layers,
            handler: self.handler.as_ref(),
        };
        next.run(&call).await
    }

    /// Invoke without borrowing `self`, for spawning or service adapters
    pub fn invoke_owned(&self, call: CallSignature) -> BoxFuture<'static, CallResult<R, E>> {
        let this = self.clone();
        async move { this.invoke(call).await }.boxed()
    }
}

impl<R, E: OperationError> Clone for AsyncDecorated<R, E> {
    fn clone(&self) -> Self {
        Self { chain: self.chain.clone(), handler: Arc::clone(&self.handler) }
    }
}

impl<R, E: OperationError> fmt::Debug for AsyncDecorated<R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.chain.describe(f, "AsyncDecorated")
    }
}
