//! Per-endpoint mailbox.
//!
//! Many senders, one consumer: the endpoint's worker drains messages in the
//! order the channel accepted them.

use tokio::sync::mpsc;

use super::{EndpointContext, LifecycleState};
use crate::address::Address;
use crate::error::RpcError;
use crate::proxy::Invocation;

/// Closure run on the worker with exclusive access to the endpoint.
pub(crate) type Task<E> = Box<dyn FnOnce(&mut E, &EndpointContext<E>) + Send>;

/// Lifecycle control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlSignal {
    /// Begin dispatching invocations.
    Start,
    /// Shut down at the endpoint's own request.
    Stop,
    /// Shut down because the hosting service stops.
    TerminationNotice,
}

pub(crate) enum Message<E> {
    Invocation(Invocation),
    RunAsync(Task<E>),
    Control(ControlSignal),
}

impl<E> Message<E> {
    /// Drop a message that will never be processed, failing its caller.
    pub(crate) fn discard(self, address: &Address, state: LifecycleState) {
        match self {
            Message::Invocation(invocation) => {
                tracing::debug!(
                    endpoint = %address,
                    method = %invocation.method,
                    %state,
                    "discarding invocation"
                );
                invocation.fail(RpcError::Discarded {
                    endpoint: address.to_string(),
                    state,
                });
            }
            Message::RunAsync(_) => {
                tracing::debug!(endpoint = %address, %state, "discarding scheduled task");
            }
            Message::Control(signal) => {
                tracing::trace!(endpoint = %address, ?signal, "dropping control signal");
            }
        }
    }
}

/// Sending side of an endpoint's mailbox.
pub(crate) struct Mailbox<E> {
    tx: mpsc::UnboundedSender<Message<E>>,
}

impl<E> Mailbox<E> {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Message<E>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a message, handing it back if the mailbox is closed.
    pub(crate) fn send(&self, message: Message<E>) -> Result<(), Message<E>> {
        self.tx.send(message).map_err(|e| e.0)
    }
}
