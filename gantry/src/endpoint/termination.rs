//! Termination signal of an endpoint.
//!
//! Completed exactly once by the endpoint's worker after teardown: with
//! `Ok(())` when the shutdown hook returned normally, with
//! [`RpcError::Teardown`] otherwise. Observers may ask for the future at any
//! point of the lifecycle, including before `start()`.

use std::future::IntoFuture;

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::error::RpcError;

type Outcome = Option<Result<(), RpcError>>;

/// Completing side, owned by the worker.
#[derive(Debug)]
pub(crate) struct TerminationSignal {
    tx: watch::Sender<Outcome>,
}

impl TerminationSignal {
    pub(crate) fn new() -> (Self, TerminationFuture) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, TerminationFuture { rx })
    }

    /// Complete the signal. Consumes it, so completion happens at most once.
    pub(crate) fn complete(self, outcome: Result<(), RpcError>) {
        self.tx.send_replace(Some(outcome));
    }
}

/// Observing side of the termination signal.
///
/// Cloneable; every clone resolves to the same outcome. Awaiting it does
/// not consume it.
#[derive(Debug, Clone)]
pub struct TerminationFuture {
    rx: watch::Receiver<Outcome>,
}

impl TerminationFuture {
    /// Whether the endpoint has terminated.
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Wait for termination.
    ///
    /// # Errors
    ///
    /// - `RpcError::Teardown` if the shutdown hook failed
    /// - `RpcError::BrokenPromise` if the worker vanished without completing
    pub async fn wait(&self) -> Result<(), RpcError> {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(RpcError::BrokenPromise)),
            Err(_) => Err(RpcError::BrokenPromise),
        }
    }
}

impl IntoFuture for TerminationFuture {
    type Output = Result<(), RpcError>;
    type IntoFuture = BoxFuture<'static, Result<(), RpcError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}
