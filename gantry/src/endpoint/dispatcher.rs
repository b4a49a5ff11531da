//! Invocation dispatch on the endpoint's worker.
//!
//! The [`DispatchTable`] maps method identities to type-erased handler
//! closures, filled once per endpoint from
//! [`RpcEndpoint::register_capabilities`]. The [`Worker`] drains the
//! mailbox and runs each message to completion before taking the next one.
//!
//! ```text
//! Invocation { TaskExecutor.submit, args, reply }
//!   ↓ state != Started        → reply Discarded
//!   ↓ no handler for method   → reply Connection (tell: log)
//!   ↓ handler(endpoint, ctx, args)
//!     Ready(result)           → reply result
//!     Pending(future)         → spawned task pipes future into reply
//! ```

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use super::mailbox::{ControlSignal, Message, Task};
use super::termination::TerminationSignal;
use super::{EndpointContext, LifecycleState, RpcEndpoint};
use crate::error::{HandlerError, RpcError};
use crate::proxy::{Invocation, MethodId, Payload, Reply, complete};

/// Outcome of running a handler closure.
pub(crate) enum Dispatched {
    Ready(Result<Payload, RpcError>),
    Pending(BoxFuture<'static, Result<Payload, RpcError>>),
}

type HandlerFn<E> = Box<dyn Fn(&mut E, &EndpointContext<E>, Payload) -> Dispatched + Send>;

/// Registry mapping method identities to handler closures.
///
/// Each closure recovers the typed arguments, calls the handler and wraps
/// its reply in the same payload kind the arguments arrived in.
pub struct DispatchTable<E> {
    handlers: HashMap<MethodId, HandlerFn<E>>,
    capabilities: HashSet<&'static str>,
}

impl<E: RpcEndpoint> DispatchTable<E> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            capabilities: HashSet::new(),
        }
    }

    /// Register a method that produces a result.
    pub fn ask<A, R, F>(&mut self, capability: &'static str, method: &'static str, handler: F)
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(&mut E, &EndpointContext<E>, A) -> Reply<R> + Send + 'static,
    {
        let id = MethodId::new(capability, method);
        tracing::trace!(method = %id, endpoint_type = std::any::type_name::<E>(), "registering ask handler");

        self.capabilities.insert(capability);
        self.handlers.insert(
            id,
            Box::new(move |endpoint: &mut E, ctx: &EndpointContext<E>, args: Payload| {
                let kind = args.kind();
                let args = match args.into_value::<A>() {
                    Ok(args) => args,
                    Err(error) => return Dispatched::Ready(Err(error)),
                };
                match handler(endpoint, ctx, args) {
                    Reply::Ready(result) => Dispatched::Ready(
                        result
                            .map_err(RpcError::Handler)
                            .and_then(|value| Payload::encode(value, kind)),
                    ),
                    Reply::Pending(future) => Dispatched::Pending(Box::pin(async move {
                        let value = future.await.map_err(RpcError::Handler)?;
                        Payload::encode(value, kind)
                    })),
                }
            }),
        );
    }

    /// Register a fire-and-forget method.
    pub fn tell<A, F>(&mut self, capability: &'static str, method: &'static str, handler: F)
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(&mut E, &EndpointContext<E>, A) + Send + 'static,
    {
        let id = MethodId::new(capability, method);
        tracing::trace!(method = %id, endpoint_type = std::any::type_name::<E>(), "registering tell handler");

        self.capabilities.insert(capability);
        self.handlers.insert(
            id,
            Box::new(move |endpoint: &mut E, ctx: &EndpointContext<E>, args: Payload| {
                let kind = args.kind();
                match args.into_value::<A>() {
                    Ok(args) => {
                        handler(endpoint, ctx, args);
                        Dispatched::Ready(Payload::encode((), kind))
                    }
                    Err(error) => Dispatched::Ready(Err(error)),
                }
            }),
        );
    }

    /// Whether any method of `capability` is registered.
    pub fn implements(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Number of registered methods.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn capabilities(&self) -> HashSet<&'static str> {
        self.capabilities.clone()
    }
}

impl<E: RpcEndpoint> Default for DispatchTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// The single consumer of an endpoint's mailbox.
pub(crate) struct Worker<E: RpcEndpoint> {
    endpoint: E,
    table: DispatchTable<E>,
    ctx: EndpointContext<E>,
    inbox: mpsc::UnboundedReceiver<Message<E>>,
    termination: TerminationSignal,
}

impl<E: RpcEndpoint> Worker<E> {
    pub(crate) fn new(
        endpoint: E,
        table: DispatchTable<E>,
        ctx: EndpointContext<E>,
        inbox: mpsc::UnboundedReceiver<Message<E>>,
        termination: TerminationSignal,
    ) -> Self {
        Self {
            endpoint,
            table,
            ctx,
            inbox,
            termination,
        }
    }

    /// Drain the mailbox until the endpoint terminates.
    pub(crate) async fn run(self) {
        let worker = self.ctx.worker_id();
        super::CURRENT_WORKER.scope(worker, self.run_loop()).await
    }

    async fn run_loop(mut self) {
        while let Some(message) = self.inbox.recv().await {
            match message {
                Message::Invocation(invocation) => self.dispatch(invocation),
                Message::RunAsync(task) => self.run_task(task),
                Message::Control(ControlSignal::Start) => self.start(),
                Message::Control(ControlSignal::Stop | ControlSignal::TerminationNotice) => break,
            }
        }
        self.terminate();
    }

    fn start(&mut self) {
        match self.ctx.core().state.transition(LifecycleState::Started) {
            Ok(_) => tracing::info!(endpoint = %self.ctx.address(), "endpoint started"),
            Err(state) => {
                tracing::debug!(endpoint = %self.ctx.address(), %state, "ignoring start request")
            }
        }
    }

    fn dispatch(&mut self, invocation: Invocation) {
        let state = self.ctx.state();
        if !state.can_dispatch() {
            Message::<E>::Invocation(invocation).discard(self.ctx.address(), state);
            return;
        }

        let Invocation {
            method,
            args,
            reply,
        } = invocation;

        let Some(handler) = self.table.handlers.get(&method) else {
            tracing::warn!(
                endpoint = %self.ctx.address(),
                method = %method,
                "endpoint does not implement method"
            );
            let error = RpcError::connection(format!(
                "endpoint {} does not implement {}",
                self.ctx.address(),
                method
            ));
            complete(&method, reply, Err(error));
            return;
        };

        let endpoint = &mut self.endpoint;
        let ctx = &self.ctx;
        let dispatched = match panic::catch_unwind(AssertUnwindSafe(|| handler(endpoint, ctx, args))) {
            Ok(dispatched) => dispatched,
            Err(payload) => {
                let error = HandlerError::from_panic(payload);
                tracing::error!(endpoint = %ctx.address(), method = %method, error = %error, "handler panicked");
                Dispatched::Ready(Err(RpcError::Handler(error)))
            }
        };

        match dispatched {
            Dispatched::Ready(result) => complete(&method, reply, result),
            Dispatched::Pending(future) => {
                // The worker moves on; the reply is completed whenever the future is.
                self.ctx.runtime().spawn(async move {
                    let result = AssertUnwindSafe(future)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| Err(RpcError::Handler(HandlerError::from_panic(payload))));
                    complete(&method, reply, result);
                });
            }
        }
    }

    fn run_task(&mut self, task: Task<E>) {
        let state = self.ctx.state();
        if !state.can_dispatch() {
            Message::RunAsync(task).discard(self.ctx.address(), state);
            return;
        }

        let endpoint = &mut self.endpoint;
        let ctx = &self.ctx;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task(endpoint, ctx))) {
            let error = HandlerError::from_panic(payload);
            tracing::error!(endpoint = %ctx.address(), error = %error, "scheduled task panicked");
        }
    }

    /// Run the shutdown hook, close the mailbox and complete the
    /// termination signal, in that order.
    fn terminate(mut self) {
        let core = self.ctx.core().clone();
        // A no-op when shutdown was requested through the endpoint or service.
        let _ = core.state.transition(LifecycleState::Stopping);

        let endpoint = &mut self.endpoint;
        let ctx = &self.ctx;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| endpoint.post_stop(ctx))) {
            Ok(result) => result,
            Err(payload) => Err(HandlerError::from_panic(payload)),
        };

        if let Err(state) = core.state.transition(LifecycleState::Terminated) {
            tracing::error!(endpoint = %core.address, %state, "unexpected state during termination");
        }

        self.inbox.close();
        while let Ok(message) = self.inbox.try_recv() {
            message.discard(&core.address, LifecycleState::Terminated);
        }

        self.ctx.service().unregister(&core.address);

        match outcome {
            Ok(()) => {
                tracing::info!(endpoint = %core.address, "endpoint terminated");
                self.termination.complete(Ok(()));
            }
            Err(error) => {
                tracing::error!(endpoint = %core.address, error = %error, "shutdown hook failed");
                self.termination.complete(Err(RpcError::Teardown(error)));
            }
        }
    }
}
