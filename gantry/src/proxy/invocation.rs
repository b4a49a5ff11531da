//! Invocation messages and handler replies.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::codec::{JsonCodec, MessageCodec};
use crate::error::{HandlerError, RpcError};

/// Identity of one capability method: `<capability>.<method>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId {
    /// Name of the capability declaring the method.
    pub capability: Cow<'static, str>,
    /// Method name within the capability.
    pub method: Cow<'static, str>,
}

impl MethodId {
    /// Identity of a statically known method.
    pub const fn new(capability: &'static str, method: &'static str) -> Self {
        Self {
            capability: Cow::Borrowed(capability),
            method: Cow::Borrowed(method),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.capability, self.method)
    }
}

/// How a payload travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PayloadKind {
    /// Same process, moved as a boxed value.
    Local,
    /// Encoded with the codec for the network.
    Encoded,
}

/// Arguments or result of one invocation.
///
/// In-process calls move values without serialization; remote calls carry
/// codec output. A reply always uses the same kind as its arguments.
pub(crate) enum Payload {
    Local(Box<dyn Any + Send>),
    Encoded(Vec<u8>),
}

impl Payload {
    pub(crate) fn local<T: Send + 'static>(value: T) -> Self {
        Payload::Local(Box::new(value))
    }

    pub(crate) fn kind(&self) -> PayloadKind {
        match self {
            Payload::Local(_) => PayloadKind::Local,
            Payload::Encoded(_) => PayloadKind::Encoded,
        }
    }

    pub(crate) fn encode<T>(value: T, kind: PayloadKind) -> Result<Self, RpcError>
    where
        T: Serialize + Send + 'static,
    {
        match kind {
            PayloadKind::Local => Ok(Payload::local(value)),
            PayloadKind::Encoded => JsonCodec
                .encode(&value)
                .map(Payload::Encoded)
                .map_err(|e| RpcError::connection(format!("failed to encode payload: {}", e))),
        }
    }

    /// Recover the typed value.
    ///
    /// A mismatch means caller and handler disagree on the method signature,
    /// which is reported like any other capability mismatch.
    pub(crate) fn into_value<T>(self) -> Result<T, RpcError>
    where
        T: DeserializeOwned + 'static,
    {
        match self {
            Payload::Local(value) => value.downcast::<T>().map(|v| *v).map_err(|_| {
                RpcError::connection(format!(
                    "payload type mismatch: expected {}",
                    std::any::type_name::<T>()
                ))
            }),
            Payload::Encoded(bytes) => JsonCodec
                .decode(&bytes)
                .map_err(|e| RpcError::connection(format!("failed to decode payload: {}", e))),
        }
    }

    pub(crate) fn into_bytes(self) -> Result<Vec<u8>, RpcError> {
        match self {
            Payload::Encoded(bytes) => Ok(bytes),
            Payload::Local(_) => Err(RpcError::connection(
                "in-process payload cannot be sent over the network",
            )),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Local(_) => f.write_str("Payload::Local(..)"),
            Payload::Encoded(bytes) => write!(f, "Payload::Encoded({} bytes)", bytes.len()),
        }
    }
}

/// Where the dispatcher delivers the outcome of an ask-style invocation.
pub(crate) type ReplySender = oneshot::Sender<Result<Payload, RpcError>>;

/// One method call travelling to an endpoint's mailbox.
#[derive(Debug)]
pub(crate) struct Invocation {
    pub(crate) method: MethodId,
    pub(crate) args: Payload,
    /// `None` for fire-and-forget calls.
    pub(crate) reply: Option<ReplySender>,
}

impl Invocation {
    /// Fail the invocation. Fire-and-forget failures are only logged.
    pub(crate) fn fail(self, error: RpcError) {
        complete(&self.method, self.reply, Err(error));
    }
}

/// Deliver a result to the caller, or log it when nobody waits for one.
pub(crate) fn complete(method: &MethodId, reply: Option<ReplySender>, result: Result<Payload, RpcError>) {
    match reply {
        Some(tx) => {
            if tx.send(result).is_err() {
                tracing::trace!(method = %method, "caller stopped waiting for reply");
            }
        }
        None => {
            if let Err(error) = result {
                tracing::warn!(method = %method, error = %error, "fire-and-forget invocation failed");
            }
        }
    }
}

/// Result of an ask-style handler.
///
/// Handlers either answer immediately or hand back a future; pending
/// futures are completed off the endpoint's worker so it can keep draining
/// its mailbox.
pub enum Reply<T> {
    /// The result is available now.
    Ready(Result<T, HandlerError>),
    /// The result will be produced by this future.
    Pending(BoxFuture<'static, Result<T, HandlerError>>),
}

impl<T> Reply<T> {
    /// Successful immediate reply.
    pub fn ok(value: T) -> Self {
        Reply::Ready(Ok(value))
    }

    /// Failed immediate reply; the error reaches the caller unchanged.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Reply::Ready(Err(HandlerError::new(error)))
    }

    /// Reply completed later by `future`.
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, HandlerError>> + Send + 'static,
    {
        Reply::Pending(Box::pin(future))
    }
}

impl<T> From<Result<T, HandlerError>> for Reply<T> {
    fn from(result: Result<T, HandlerError>) -> Self {
        Reply::Ready(result)
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ready(Ok(_)) => f.write_str("Reply::Ready(Ok(..))"),
            Reply::Ready(Err(e)) => write!(f, "Reply::Ready(Err({}))", e),
            Reply::Pending(_) => f.write_str("Reply::Pending(..)"),
        }
    }
}
