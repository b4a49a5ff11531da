//! Caller-side future of an ask-style invocation.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use super::invocation::Payload;
use crate::error::RpcError;

/// Future resolving to the result of a gateway call.
///
/// Every failure, including ones detected before the message left the
/// caller, is reported through this future; creating it never fails.
///
/// Dropping it does not cancel the invocation: the handler still runs and
/// its result is discarded.
#[must_use = "the result of a gateway call is only observable through this future"]
pub struct RpcFuture<T> {
    inner: BoxFuture<'static, Result<T, RpcError>>,
}

impl<T: Send + 'static> RpcFuture<T> {
    /// Wrap an arbitrary future.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, RpcError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(future),
        }
    }

    /// Future that is already complete.
    pub fn ready(result: Result<T, RpcError>) -> Self {
        Self::new(futures::future::ready(result))
    }

    /// Future that already failed with `error`.
    pub fn failed(error: RpcError) -> Self {
        Self::ready(Err(error))
    }
}

impl<T> RpcFuture<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Await the dispatcher's reply and decode it.
    pub(crate) fn from_reply(rx: oneshot::Receiver<Result<Payload, RpcError>>) -> Self {
        Self::new(async move {
            match rx.await {
                Ok(Ok(payload)) => payload.into_value::<T>(),
                Ok(Err(error)) => Err(error),
                Err(_) => Err(RpcError::BrokenPromise),
            }
        })
    }
}

impl<T> Future for RpcFuture<T> {
    type Output = Result<T, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<T> fmt::Debug for RpcFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcFuture").finish_non_exhaustive()
    }
}
