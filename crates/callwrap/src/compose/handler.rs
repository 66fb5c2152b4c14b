//! Type-erased wrapped functions

use futures::future::BoxFuture;

use crate::call::CallSignature;

/// A blocking function as stored at the bottom of a chain
pub type SyncHandler<R, E> = dyn Fn(&CallSignature) -> Result<R, E> + Send + Sync;

/// An async function as stored at the bottom of a chain
///
/// Takes the signature by value so the returned future owns its arguments.
pub type AsyncHandler<R, E> =
    dyn Fn(CallSignature) -> BoxFuture<'static, Result<R, E>> + Send + Sync;
