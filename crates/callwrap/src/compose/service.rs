//! `tower::Service` adapter for async pipelines
//!
//! Lets a host framework mount an [`AsyncDecorated`] function behind its own
//! tower stack. Readiness is always immediate; admission control happens
//! inside the pipeline and surfaces as a [`CallError`].

use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tower::Service;

use super::AsyncDecorated;
use crate::call::CallSignature;
use crate::error::{CallError, CallResult, OperationError};

impl<R, E> Service<CallSignature> for AsyncDecorated<R, E>
where
    R: Send + 'static,
    E: OperationError,
{
    type Response = R;
    type Error = CallError<E>;
    type Future = BoxFuture<'static, CallResult<R, E>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: CallSignature) -> Self::Future {
        self.invoke_owned(request)
    }
}
