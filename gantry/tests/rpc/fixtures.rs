//! Capabilities and endpoints shared by the integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gantry::{
    DispatchTable, EndpointContext, HandlerError, Reply, RpcEndpoint, RpcFuture, RpcService,
    RpcServiceConfig, gateway,
};
use tokio::sync::oneshot;

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

pub async fn local_service() -> RpcService {
    init_tracing();
    RpcService::start(RpcServiceConfig::local())
        .await
        .expect("start local service")
}

pub async fn loopback_service(name: &str) -> RpcService {
    init_tracing();
    RpcService::start(RpcServiceConfig::loopback().with_name(name))
        .await
        .expect("start loopback service")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("test failure: {0}")]
pub struct TestFailure(pub String);

/// The capability most tests talk to.
#[gateway]
pub trait TestGateway {
    /// Always answers 1337.
    fn foobar(&self) -> RpcFuture<i32>;

    /// Echo the arguments back.
    fn echo(&self, text: String, times: u32) -> RpcFuture<String>;

    /// Fail immediately with `TestFailure(message)`.
    fn fail_sync(&self, message: String) -> RpcFuture<i32>;

    /// Fail with `TestFailure(message)` from a pending future.
    fn fail_async(&self, message: String) -> RpcFuture<i32>;

    /// Panic inside the handler.
    fn explode(&self) -> RpcFuture<i32>;

    /// Append to the history.
    fn record(&self, value: u32);

    /// Block the worker for `millis`, then append to the history.
    fn slow_record(&self, millis: u64, value: u32) -> RpcFuture<()>;

    /// Everything recorded so far, in execution order.
    fn history(&self) -> RpcFuture<Vec<u32>>;

    /// Reply once the test releases the gate.
    fn gated(&self) -> RpcFuture<u32>;
}

/// A capability `TestEndpoint` does not implement.
#[gateway(name = "Other")]
pub trait OtherGateway {
    fn ping(&self) -> RpcFuture<String>;
    fn poke(&self);
}

#[derive(Default)]
pub struct TestEndpoint {
    pub history: Vec<u32>,
    pub gate: Option<oneshot::Receiver<u32>>,
}

impl TestEndpoint {
    pub fn gated() -> (Self, oneshot::Sender<u32>) {
        let (tx, rx) = oneshot::channel();
        let endpoint = Self {
            history: Vec::new(),
            gate: Some(rx),
        };
        (endpoint, tx)
    }
}

impl RpcEndpoint for TestEndpoint {
    fn register_capabilities(table: &mut DispatchTable<Self>) {
        TestGatewayProxy::register_handlers(table);
    }
}

impl TestGatewayHandler for TestEndpoint {
    fn foobar(&mut self, ctx: &EndpointContext<Self>) -> Reply<i32> {
        ctx.validate_runs_on_worker();
        Reply::ok(1337)
    }

    fn echo(&mut self, _ctx: &EndpointContext<Self>, text: String, times: u32) -> Reply<String> {
        Reply::ok(text.repeat(times as usize))
    }

    fn fail_sync(&mut self, _ctx: &EndpointContext<Self>, message: String) -> Reply<i32> {
        Reply::failed(TestFailure(message))
    }

    fn fail_async(&mut self, _ctx: &EndpointContext<Self>, message: String) -> Reply<i32> {
        Reply::pending(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<i32, _>(HandlerError::new(TestFailure(message)))
        })
    }

    fn explode(&mut self, _ctx: &EndpointContext<Self>) -> Reply<i32> {
        panic!("kaboom");
    }

    fn record(&mut self, ctx: &EndpointContext<Self>, value: u32) {
        ctx.validate_runs_on_worker();
        self.history.push(value);
    }

    fn slow_record(&mut self, _ctx: &EndpointContext<Self>, millis: u64, value: u32) -> Reply<()> {
        std::thread::sleep(Duration::from_millis(millis));
        self.history.push(value);
        Reply::ok(())
    }

    fn history(&mut self, _ctx: &EndpointContext<Self>) -> Reply<Vec<u32>> {
        Reply::ok(self.history.clone())
    }

    fn gated(&mut self, _ctx: &EndpointContext<Self>) -> Reply<u32> {
        match self.gate.take() {
            Some(gate) => Reply::pending(async move { gate.await.map_err(HandlerError::new) }),
            None => Reply::failed(TestFailure("gate already taken".into())),
        }
    }
}

/// Endpoint whose shutdown hook checks where it runs and optionally fails.
pub struct StoppingEndpoint {
    pub fail: bool,
    pub ran_on_worker: Arc<AtomicBool>,
}

impl StoppingEndpoint {
    pub fn new(fail: bool) -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        let endpoint = Self {
            fail,
            ran_on_worker: flag.clone(),
        };
        (endpoint, flag)
    }
}

impl RpcEndpoint for StoppingEndpoint {
    fn post_stop(&mut self, ctx: &EndpointContext<Self>) -> Result<(), HandlerError> {
        ctx.validate_runs_on_worker();
        self.ran_on_worker.store(ctx.runs_on_worker(), Ordering::SeqCst);
        if self.fail {
            Err(HandlerError::new(TestFailure("teardown".into())))
        } else {
            Ok(())
        }
    }
}
