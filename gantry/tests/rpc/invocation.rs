//! Dispatch semantics: ordering, failure propagation and the worker executor.

use std::time::Duration;

use gantry::{Endpoint, HandlerPanic, RpcError};

use super::fixtures::{
    OtherGateway, OtherGatewayProxy, TestEndpoint, TestFailure, TestGateway, TestGatewayProxy,
    local_service,
};

async fn started_endpoint(
    endpoint: TestEndpoint,
) -> (gantry::RpcService, Endpoint<TestEndpoint>, TestGatewayProxy) {
    let service = local_service().await;
    let endpoint = Endpoint::new(&service, endpoint).expect("create endpoint");
    endpoint.start();
    let proxy = endpoint.self_gateway().expect("self gateway");
    (service, endpoint, proxy)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_arguments_reach_the_handler() {
    let (_service, _endpoint, proxy) = started_endpoint(TestEndpoint::default()).await;
    let echoed = proxy.echo("ab".into(), 3).await.expect("echo");
    assert_eq!(echoed, "ababab");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_synchronous_handler_error_is_passed_through() {
    let (_service, _endpoint, proxy) = started_endpoint(TestEndpoint::default()).await;

    let error = proxy.fail_sync("boom".into()).await.expect_err("handler fails");
    let RpcError::Handler(cause) = &error else {
        panic!("expected handler error, got {:?}", error);
    };
    assert_eq!(cause.downcast_ref::<TestFailure>(), Some(&TestFailure("boom".into())));
    assert!(cause.type_name().ends_with("TestFailure"));
    assert_eq!(error.to_string(), "test failure: boom");

    // The worker keeps draining after a failure.
    assert_eq!(proxy.foobar().await.expect("next call"), 1337);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_asynchronous_handler_error_is_passed_through() {
    let (_service, _endpoint, proxy) = started_endpoint(TestEndpoint::default()).await;

    let error = proxy.fail_async("later".into()).await.expect_err("handler fails");
    let cause = error.handler_error().expect("handler error");
    assert!(cause.is::<TestFailure>());
    assert_eq!(cause.downcast_ref::<TestFailure>(), Some(&TestFailure("later".into())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_panicking_handler_does_not_halt_worker() {
    let (_service, _endpoint, proxy) = started_endpoint(TestEndpoint::default()).await;

    let error = proxy.explode().await.expect_err("handler panics");
    let panic = error
        .handler_error()
        .and_then(|e| e.downcast_ref::<HandlerPanic>())
        .expect("panic captured as handler error");
    assert_eq!(panic.message, "kaboom");

    assert_eq!(proxy.foobar().await.expect("worker still alive"), 1337);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_invocations_execute_in_submission_order() {
    let (_service, _endpoint, proxy) = started_endpoint(TestEndpoint::default()).await;

    for value in 0..200 {
        proxy.record(value);
    }
    let history = proxy.history().await.expect("history");
    assert_eq!(history, (0..200).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_senders_keep_their_own_order() {
    let (_service, _endpoint, proxy) = started_endpoint(TestEndpoint::default()).await;

    let senders: Vec<_> = (0..4u32)
        .map(|sender| {
            let proxy = proxy.clone();
            tokio::spawn(async move {
                for seq in 0..100u32 {
                    proxy.record(sender * 1000 + seq);
                    if seq % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for sender in senders {
        sender.await.expect("sender task");
    }

    let history = proxy.history().await.expect("history");
    assert_eq!(history.len(), 400);
    for sender in 0..4u32 {
        let seen: Vec<u32> = history
            .iter()
            .copied()
            .filter(|v| v / 1000 == sender)
            .collect();
        let expected: Vec<u32> = (0..100).map(|seq| sender * 1000 + seq).collect();
        assert_eq!(seen, expected, "sender {} reordered", sender);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pending_reply_does_not_block_worker() {
    let (endpoint, gate) = TestEndpoint::gated();
    let (_service, _endpoint, proxy) = started_endpoint(endpoint).await;

    let mut gated = proxy.gated();
    assert_eq!(proxy.foobar().await.expect("worker free"), 1337);
    assert!(
        tokio::time::timeout(Duration::from_millis(20), &mut gated)
            .await
            .is_err(),
        "gated reply completed early"
    );

    gate.send(7).expect("release gate");
    assert_eq!(gated.await.expect("gated reply"), 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timed_out_wait_still_runs_handler() {
    let (_service, _endpoint, proxy) = started_endpoint(TestEndpoint::default()).await;

    let impatient = tokio::time::timeout(Duration::from_millis(10), proxy.slow_record(200, 5)).await;
    assert!(impatient.is_err());

    let history = proxy.history().await.expect("history");
    assert_eq!(history, vec![5]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mismatched_capability() {
    let service = local_service().await;
    let endpoint = Endpoint::new(&service, TestEndpoint::default()).expect("create endpoint");
    endpoint.start();

    // Connecting does not check the capability.
    let other: OtherGatewayProxy = service
        .connect(&endpoint.address().to_string(), Duration::from_secs(1))
        .await
        .expect("connect");

    // Fire-and-forget is only logged at the target.
    other.poke();

    let error = other.ping().await.expect_err("capability mismatch");
    assert!(error.is_connection(), "got {:?}", error);

    let proxy: TestGatewayProxy = endpoint.self_gateway().expect("self gateway");
    assert_eq!(proxy.foobar().await.expect("worker still alive"), 1337);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_self_gateway_rejects_unimplemented_capability() {
    let (_service, endpoint, _proxy) = started_endpoint(TestEndpoint::default()).await;
    let error = endpoint
        .self_gateway::<OtherGatewayProxy>()
        .expect_err("not implemented");
    assert!(error.is_connection());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_async_runs_on_worker() {
    let (_service, endpoint, _proxy) = started_endpoint(TestEndpoint::default()).await;

    let on_worker = endpoint
        .call_async(|_endpoint, ctx| ctx.runs_on_worker())
        .await
        .expect("call_async");
    assert!(on_worker);

    let ctx = endpoint
        .call_async(|_endpoint, ctx| ctx.clone())
        .await
        .expect("context");
    assert!(!ctx.runs_on_worker());
    assert_eq!(ctx.address(), endpoint.address());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_run_async_mutates_endpoint_state() {
    let (_service, endpoint, proxy) = started_endpoint(TestEndpoint::default()).await;

    endpoint.run_async(|state, _ctx| state.history.push(1));
    endpoint.schedule_run_async(|state, _ctx| state.history.push(3), Duration::from_millis(30));
    proxy.record(2);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(proxy.history().await.expect("history"), vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_call_async_failures() {
    let service = local_service().await;
    let endpoint = Endpoint::new(&service, TestEndpoint::default()).expect("create endpoint");

    let early = endpoint.call_async(|state, _ctx| state.history.len());
    let error = early.await.expect_err("not started");
    assert!(error.is_discarded(), "got {:?}", error);

    endpoint.start();
    let error = endpoint
        .call_async(|_state, _ctx| -> usize { panic!("task failed") })
        .await
        .expect_err("task panics");
    assert!(
        error
            .handler_error()
            .is_some_and(|e| e.is::<HandlerPanic>())
    );
}
