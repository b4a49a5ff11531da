//! Error types for invocations, endpoints and services.
//!
//! Every asynchronous operation reports failure through its future as an
//! [`RpcError`]:
//! - the target could not be resolved, reached or does not implement the
//!   capability ([`RpcError::Connection`])
//! - the invocation reached an endpoint that was not started ([`RpcError::Discarded`])
//! - the handler itself failed ([`RpcError::Handler`])
//! - the shutdown hook failed, on termination futures only ([`RpcError::Teardown`])
//! - the reply sender vanished without answering ([`RpcError::BrokenPromise`])
//!
//! Service level failures that are not invocation results use [`ServiceError`].

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::endpoint::LifecycleState;

type DynError = dyn std::error::Error + Send + Sync + 'static;

/// Failure raised by application logic inside a handler or shutdown hook.
///
/// In-process the original error object is kept intact so callers can
/// recover it with [`HandlerError::downcast_ref`]. When the error crosses
/// the network it is converted into an [`ErrorEnvelope`] and arrives as a
/// [`RemoteFailure`] that still reports the original type name and message.
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "ErrorEnvelope", from = "ErrorEnvelope")]
pub struct HandlerError {
    inner: Arc<DynError>,
    type_name: Cow<'static, str>,
}

impl HandlerError {
    /// Wrap an application error, keeping its concrete type.
    ///
    /// Wrapping a `HandlerError` returns it unchanged.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(existing) = (&error as &dyn Any).downcast_ref::<HandlerError>() {
            return existing.clone();
        }
        Self {
            inner: Arc::new(error),
            type_name: Cow::Borrowed(std::any::type_name::<E>()),
        }
    }

    /// Build an error carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(HandlerMessage(message.into()))
    }

    /// Convert a panic payload caught on a worker into an error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(HandlerPanic { message })
    }

    /// Fully qualified type name of the original error.
    ///
    /// Preserved across the network even though the value is not.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Whether the wrapped error is of type `E`.
    pub fn is<E: std::error::Error + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    /// Borrow the wrapped error as its concrete type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Borrow the wrapped error as a trait object.
    pub fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("type_name", &self.type_name)
            .field("error", &self.inner)
            .finish()
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// Message-only handler failure created by [`HandlerError::msg`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerMessage(pub String);

/// A panic caught while running a handler or shutdown hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("handler panicked: {message}")]
pub struct HandlerPanic {
    /// The panic message, when it was a string.
    pub message: String,
}

/// Serializable description of an error and its cause chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Type name of the original error.
    pub type_name: String,
    /// Display output of the original error.
    pub message: String,
    /// The error's source, if any.
    pub cause: Option<Box<ErrorEnvelope>>,
}

impl ErrorEnvelope {
    fn from_source(error: &(dyn std::error::Error + 'static)) -> Self {
        Self {
            // Sources are only known as trait objects.
            type_name: "dyn std::error::Error".to_string(),
            message: error.to_string(),
            cause: error.source().map(|s| Box::new(Self::from_source(s))),
        }
    }
}

impl From<HandlerError> for ErrorEnvelope {
    fn from(error: HandlerError) -> Self {
        Self {
            type_name: error.type_name.to_string(),
            message: error.inner.to_string(),
            cause: error
                .inner
                .source()
                .map(|s| Box::new(ErrorEnvelope::from_source(s))),
        }
    }
}

impl From<ErrorEnvelope> for HandlerError {
    fn from(envelope: ErrorEnvelope) -> Self {
        let type_name = Cow::Owned(envelope.type_name.clone());
        Self {
            inner: Arc::new(RemoteFailure::from(envelope)),
            type_name,
        }
    }
}

/// Handler failure that happened in another process.
///
/// The concrete error type is not available here; the type name, message
/// and cause chain are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    /// Type name of the error raised remotely.
    pub type_name: String,
    /// Message of the error raised remotely.
    pub message: String,
    cause: Option<Box<RemoteFailure>>,
}

impl From<ErrorEnvelope> for RemoteFailure {
    fn from(envelope: ErrorEnvelope) -> Self {
        Self {
            type_name: envelope.type_name,
            message: envelope.message,
            cause: envelope.cause.map(|c| Box::new(RemoteFailure::from(*c))),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Error delivered through invocation, lookup and termination futures.
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum RpcError {
    /// Address unresolved, target unreachable, or capability not implemented.
    #[error("connection error: {message}")]
    Connection {
        /// What went wrong.
        message: String,
    },

    /// The invocation reached an endpoint that was not started.
    #[error("invocation discarded: endpoint {endpoint} is {state}")]
    Discarded {
        /// Address of the endpoint, as text.
        endpoint: String,
        /// Lifecycle state observed when the invocation was dropped.
        state: LifecycleState,
    },

    /// The handler failed; the error is passed through unchanged.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The shutdown hook failed.
    #[error("endpoint teardown failed: {0}")]
    Teardown(#[source] HandlerError),

    /// The reply sender was dropped without producing a result.
    #[error("reply dropped without completion")]
    BrokenPromise,
}

impl RpcError {
    /// Build a connection-class error.
    pub fn connection(message: impl Into<String>) -> Self {
        RpcError::Connection {
            message: message.into(),
        }
    }

    /// Whether this is a connection-class error.
    pub fn is_connection(&self) -> bool {
        matches!(self, RpcError::Connection { .. })
    }

    /// Whether this is a discard-class error.
    pub fn is_discarded(&self) -> bool {
        matches!(self, RpcError::Discarded { .. })
    }

    /// The application error behind a `Handler` or `Teardown` failure.
    pub fn handler_error(&self) -> Option<&HandlerError> {
        match self {
            RpcError::Handler(e) | RpcError::Teardown(e) => Some(e),
            _ => None,
        }
    }
}

/// Failures of the service itself rather than of one invocation.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The TCP listener could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    /// The listener address cannot be published to peers.
    #[error("listen address {0} is not routable; set an advertised ip")]
    UnroutableAddress(std::net::SocketAddr),

    /// The service has been stopped.
    #[error("rpc service is stopped")]
    Stopped,

    /// An endpoint with this name is already registered.
    #[error("endpoint name already in use: {0}")]
    DuplicateName(String),

    /// The endpoint name is empty or contains a `/`.
    #[error("invalid endpoint name: {0:?}")]
    InvalidName(String),

    /// Some endpoints did not terminate within the shutdown timeout.
    #[error("{0} endpoint(s) did not terminate before the shutdown timeout")]
    ShutdownTimedOut(usize),
}
