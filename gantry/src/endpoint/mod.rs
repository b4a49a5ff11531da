//! Endpoints: long-lived objects hosting application logic.
//!
//! Each endpoint owns a mailbox, a lifecycle state and a termination
//! signal. A single worker task drains the mailbox, so handler code has
//! exclusive access to the endpoint value no matter how many callers send
//! to it concurrently.
//!
//! # Example
//!
//! ```rust,ignore
//! #[gantry::gateway]
//! pub trait Counter {
//!     fn add(&self, delta: i64) -> gantry::RpcFuture<i64>;
//! }
//!
//! struct CounterEndpoint { total: i64 }
//!
//! impl RpcEndpoint for CounterEndpoint {
//!     fn register_capabilities(table: &mut DispatchTable<Self>) {
//!         CounterProxy::register_handlers(table);
//!     }
//! }
//!
//! impl CounterHandler for CounterEndpoint {
//!     fn add(&mut self, _ctx: &EndpointContext<Self>, delta: i64) -> Reply<i64> {
//!         self.total += delta;
//!         Reply::ok(self.total)
//!     }
//! }
//!
//! let endpoint = Endpoint::new(&service, CounterEndpoint { total: 0 })?;
//! endpoint.start();
//! let counter: CounterProxy = endpoint.self_gateway()?;
//! assert_eq!(counter.add(2).await?, 2);
//! ```

mod dispatcher;
mod lifecycle;
mod mailbox;
mod termination;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;

pub use dispatcher::DispatchTable;
pub(crate) use dispatcher::Worker;
pub use lifecycle::LifecycleState;
pub(crate) use lifecycle::LifecycleCell;
pub(crate) use mailbox::{ControlSignal, Mailbox, Message};
pub use termination::TerminationFuture;
pub(crate) use termination::TerminationSignal;

use crate::address::Address;
use crate::error::{HandlerError, RpcError, ServiceError};
use crate::proxy::{Capability, GatewayTarget, Invocation, RpcFuture};
use crate::service::RpcService;

tokio::task_local! {
    /// Identity of the worker whose task is currently running.
    pub(crate) static CURRENT_WORKER: WorkerId;
}

/// Identity of one endpoint worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WorkerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Application logic hosted by an endpoint.
///
/// Implementations declare their capabilities by filling the dispatch
/// table, usually through the `register_handlers` function generated by
/// [`#[gateway]`](crate::gateway).
pub trait RpcEndpoint: Send + Sized + 'static {
    /// Register the handlers for every capability this endpoint implements.
    fn register_capabilities(table: &mut DispatchTable<Self>) {
        let _ = table;
    }

    /// Shutdown hook, run on the endpoint's worker during teardown.
    ///
    /// A returned error (or a panic) becomes the failure of the
    /// termination future.
    fn post_stop(&mut self, ctx: &EndpointContext<Self>) -> Result<(), HandlerError> {
        let _ = ctx;
        Ok(())
    }
}

/// Type-erased view of a running endpoint, held by the service registry
/// and by gateway proxies.
pub(crate) trait RegisteredEndpoint: Send + Sync {
    fn address(&self) -> &Address;

    /// Enqueue an invocation; a closed mailbox fails it as discarded.
    fn post(&self, invocation: Invocation);

    /// Begin shutdown on behalf of the hosting service.
    fn terminate(&self) -> TerminationFuture;
}

/// Shared core of one endpoint.
pub(crate) struct LocalEndpoint<E> {
    pub(crate) address: Address,
    pub(crate) state: LifecycleCell,
    mailbox: Mailbox<E>,
    termination: TerminationFuture,
    capabilities: HashSet<&'static str>,
}

impl<E> LocalEndpoint<E> {
    pub(crate) fn new(
        address: Address,
        mailbox: Mailbox<E>,
        termination: TerminationFuture,
        capabilities: HashSet<&'static str>,
    ) -> Self {
        Self {
            address,
            state: LifecycleCell::new(),
            mailbox,
            termination,
            capabilities,
        }
    }

    fn send(&self, message: Message<E>) {
        if let Err(message) = self.mailbox.send(message) {
            message.discard(&self.address, self.state.get());
        }
    }

    /// Move to `Stopping` and enqueue `signal`. Only the first request wins.
    fn request_termination(&self, signal: ControlSignal) -> TerminationFuture {
        match self.state.transition(LifecycleState::Stopping) {
            Ok(previous) => {
                tracing::debug!(endpoint = %self.address, %previous, ?signal, "shutdown requested");
                self.send(Message::Control(signal));
            }
            Err(state) => {
                tracing::debug!(endpoint = %self.address, %state, "shutdown already in progress");
            }
        }
        self.termination.clone()
    }
}

impl<E: RpcEndpoint> RegisteredEndpoint for LocalEndpoint<E> {
    fn address(&self) -> &Address {
        &self.address
    }

    fn post(&self, invocation: Invocation) {
        self.send(Message::Invocation(invocation));
    }

    fn terminate(&self) -> TerminationFuture {
        self.request_termination(ControlSignal::TerminationNotice)
    }
}

/// Handle to an endpoint.
///
/// Cloning the handle does not clone the endpoint. Dropping every handle
/// does not stop it either; call [`Endpoint::shut_down`] or stop the
/// hosting service.
pub struct Endpoint<E> {
    core: Arc<LocalEndpoint<E>>,
    service: RpcService,
}

impl<E> Clone for Endpoint<E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            service: self.service.clone(),
        }
    }
}

impl<E: RpcEndpoint> Endpoint<E> {
    /// Create an unstarted endpoint with a generated name.
    ///
    /// # Errors
    ///
    /// `ServiceError::Stopped` if the service has been stopped.
    pub fn new(service: &RpcService, endpoint: E) -> Result<Self, ServiceError> {
        service.spawn_endpoint(endpoint, None)
    }

    /// Create an unstarted endpoint with a caller-supplied stable name.
    ///
    /// # Errors
    ///
    /// - `ServiceError::InvalidName` if `name` is empty or contains a `/`
    /// - `ServiceError::DuplicateName` if the name is taken in this service
    /// - `ServiceError::Stopped` if the service has been stopped
    pub fn with_name(
        service: &RpcService,
        endpoint: E,
        name: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        service.spawn_endpoint(endpoint, Some(name.into()))
    }

    pub(crate) fn from_parts(core: Arc<LocalEndpoint<E>>, service: RpcService) -> Self {
        Self { core, service }
    }

    /// Start dispatching invocations.
    ///
    /// Takes effect when the worker drains the start signal; invocations
    /// enqueued before it are discarded.
    pub fn start(&self) {
        self.core.send(Message::Control(ControlSignal::Start));
    }

    /// Request shutdown. Safe to call from any thread, any number of times.
    pub fn shut_down(&self) -> TerminationFuture {
        self.core.request_termination(ControlSignal::Stop)
    }

    /// The endpoint's address.
    pub fn address(&self) -> &Address {
        &self.core.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.core.state.get()
    }

    /// Future completed once the endpoint has terminated.
    pub fn termination_future(&self) -> TerminationFuture {
        self.core.termination.clone()
    }

    /// The hosting service.
    pub fn service(&self) -> &RpcService {
        &self.service
    }

    /// Proxy bound directly to this endpoint's mailbox, without resolution.
    ///
    /// # Errors
    ///
    /// `RpcError::Connection` if the endpoint does not implement `C`.
    pub fn self_gateway<C: Capability>(&self) -> Result<C, RpcError> {
        if !self.core.capabilities.contains(C::NAME) {
            return Err(RpcError::connection(format!(
                "endpoint {} does not implement {}",
                self.core.address,
                C::NAME
            )));
        }
        let target: Arc<dyn RegisteredEndpoint> = self.core.clone();
        Ok(C::bind(GatewayTarget::local(target, C::NAME)))
    }

    /// Run `task` on the worker. Dropped unless the endpoint is started
    /// when the task is drained.
    pub fn run_async<F>(&self, task: F)
    where
        F: FnOnce(&mut E, &EndpointContext<E>) + Send + 'static,
    {
        self.core.send(Message::RunAsync(Box::new(task)));
    }

    /// Run `task` on the worker after `delay`.
    pub fn schedule_run_async<F>(&self, task: F, delay: Duration)
    where
        F: FnOnce(&mut E, &EndpointContext<E>) + Send + 'static,
    {
        let core = self.core.clone();
        self.service.runtime().spawn(async move {
            tokio::time::sleep(delay).await;
            core.send(Message::RunAsync(Box::new(task)));
        });
    }

    /// Run `task` on the worker and return its result.
    ///
    /// Fails with `Discarded` if the endpoint is not started when the task
    /// is drained, and with `Handler` if the task panics.
    pub fn call_async<R, F>(&self, task: F) -> RpcFuture<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut E, &EndpointContext<E>) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.run_async(move |endpoint, ctx| {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task(endpoint, ctx)))
                .map_err(HandlerError::from_panic);
            let _ = tx.send(result);
        });

        let core = self.core.clone();
        RpcFuture::new(async move {
            match rx.await {
                Ok(result) => result.map_err(RpcError::Handler),
                Err(_) => Err(RpcError::Discarded {
                    endpoint: core.address.to_string(),
                    state: core.state.get(),
                }),
            }
        })
    }
}

/// Execution context handed to handlers and the shutdown hook.
pub struct EndpointContext<E> {
    endpoint: Endpoint<E>,
    worker: WorkerId,
}

impl<E> Clone for EndpointContext<E> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint.clone(),
            worker: self.worker,
        }
    }
}

impl<E: RpcEndpoint> EndpointContext<E> {
    pub(crate) fn new(endpoint: Endpoint<E>, worker: WorkerId) -> Self {
        Self { endpoint, worker }
    }

    pub(crate) fn core(&self) -> &Arc<LocalEndpoint<E>> {
        &self.endpoint.core
    }

    pub(crate) fn worker_id(&self) -> WorkerId {
        self.worker
    }

    pub(crate) fn runtime(&self) -> &tokio::runtime::Handle {
        self.endpoint.service.runtime()
    }

    /// Handle to the endpoint being executed.
    pub fn endpoint(&self) -> &Endpoint<E> {
        &self.endpoint
    }

    /// The endpoint's address.
    pub fn address(&self) -> &Address {
        self.endpoint.address()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.endpoint.state()
    }

    /// The hosting service, e.g. to connect to other endpoints.
    pub fn service(&self) -> &RpcService {
        self.endpoint.service()
    }

    /// Whether the caller runs on this endpoint's worker.
    ///
    /// False inside futures returned by handlers: those are completed by
    /// separate tasks.
    pub fn runs_on_worker(&self) -> bool {
        CURRENT_WORKER
            .try_with(|current| *current == self.worker)
            .unwrap_or(false)
    }

    /// Assert that the caller runs on this endpoint's worker.
    ///
    /// # Panics
    ///
    /// Panics when called from any other task or thread.
    pub fn validate_runs_on_worker(&self) {
        assert!(
            self.runs_on_worker(),
            "endpoint {} state accessed outside its worker",
            self.address()
        );
    }

    /// See [`Endpoint::self_gateway`].
    pub fn self_gateway<C: Capability>(&self) -> Result<C, RpcError> {
        self.endpoint.self_gateway()
    }

    /// See [`Endpoint::run_async`].
    pub fn run_async<F>(&self, task: F)
    where
        F: FnOnce(&mut E, &EndpointContext<E>) + Send + 'static,
    {
        self.endpoint.run_async(task)
    }

    /// See [`Endpoint::schedule_run_async`].
    pub fn schedule_run_async<F>(&self, task: F, delay: Duration)
    where
        F: FnOnce(&mut E, &EndpointContext<E>) + Send + 'static,
    {
        self.endpoint.schedule_run_async(task, delay)
    }

    /// See [`Endpoint::call_async`].
    pub fn call_async<R, F>(&self, task: F) -> RpcFuture<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut E, &EndpointContext<E>) -> R + Send + 'static,
    {
        self.endpoint.call_async(task)
    }

    /// Request shutdown of this endpoint; see [`Endpoint::shut_down`].
    pub fn shut_down(&self) -> TerminationFuture {
        self.endpoint.shut_down()
    }
}
