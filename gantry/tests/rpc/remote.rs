//! Invocations between two services over loopback TCP.

use std::time::{Duration, Instant};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use gantry::{
    Endpoint, Gateway, LifecycleState, Location, RemoteFailure, RpcError, RpcService,
    RpcServiceConfig, ServiceError,
};

use super::fixtures::{
    OtherGateway, OtherGatewayProxy, TestEndpoint, TestGateway, TestGatewayProxy, init_tracing,
    loopback_service,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_round_trip() {
    let server = loopback_service("server").await;
    let client = loopback_service("client").await;

    let endpoint =
        Endpoint::with_name(&server, TestEndpoint::default(), "worker").expect("create endpoint");
    endpoint.start();
    assert!(matches!(endpoint.address().location(), Location::Network(_)));

    let proxy: TestGatewayProxy = client
        .connect(&endpoint.address().to_string(), Duration::from_secs(2))
        .await
        .expect("connect");
    assert_eq!(proxy.address(), endpoint.address());

    assert_eq!(proxy.foobar().await.expect("foobar"), 1337);
    assert_eq!(proxy.echo("xy".into(), 2).await.expect("echo"), "xyxy");

    for value in 0..20 {
        proxy.record(value);
    }
    assert_eq!(
        proxy.history().await.expect("history"),
        (0..20).collect::<Vec<_>>()
    );

    client.stop_service().await.expect("stop client");
    server.stop_service().await.expect("stop server");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_handler_error_keeps_type_and_message() {
    let server = loopback_service("server").await;
    let client = loopback_service("client").await;
    let endpoint = Endpoint::new(&server, TestEndpoint::default()).expect("create endpoint");
    endpoint.start();

    let proxy: TestGatewayProxy = client
        .connect(&endpoint.address().to_string(), Duration::from_secs(2))
        .await
        .expect("connect");

    let error = proxy.fail_sync("remote boom".into()).await.expect_err("fails");
    let RpcError::Handler(cause) = &error else {
        panic!("expected handler error, got {:?}", error);
    };
    assert!(cause.type_name().ends_with("TestFailure"), "{}", cause.type_name());
    assert_eq!(cause.to_string(), "test failure: remote boom");
    let remote = cause.downcast_ref::<RemoteFailure>().expect("remote failure");
    assert_eq!(remote.message, "test failure: remote boom");

    let error = proxy.fail_async("async boom".into()).await.expect_err("fails");
    assert_eq!(
        error.handler_error().map(|e| e.to_string()),
        Some("test failure: async boom".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_discard_and_mismatch() {
    let server = loopback_service("server").await;
    let client = loopback_service("client").await;
    let endpoint = Endpoint::new(&server, TestEndpoint::default()).expect("create endpoint");
    let address = endpoint.address().to_string();

    let proxy: TestGatewayProxy = client
        .connect(&address, Duration::from_secs(2))
        .await
        .expect("connect before start");
    match proxy.foobar().await {
        Err(RpcError::Discarded { state, .. }) => assert_eq!(state, LifecycleState::Created),
        other => panic!("expected discard, got {:?}", other),
    }

    endpoint.start();
    assert_eq!(proxy.foobar().await.expect("after start"), 1337);

    let other: OtherGatewayProxy = client
        .connect(&address, Duration::from_secs(2))
        .await
        .expect("connect with other capability");
    other.poke();
    let error = other.ping().await.expect_err("mismatch");
    assert!(error.is_connection(), "got {:?}", error);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_own_network_address_resolves_locally() {
    let server = loopback_service("server").await;
    let endpoint = Endpoint::new(&server, TestEndpoint::default()).expect("create endpoint");
    endpoint.start();

    let proxy: TestGatewayProxy = server
        .connect(&endpoint.address().to_string(), Duration::from_secs(1))
        .await
        .expect("connect");
    assert_eq!(proxy.foobar().await.expect("call"), 1337);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remote_connect_failures() {
    let server = loopback_service("server").await;
    let client = loopback_service("client").await;
    let server_addr = server.network_address().expect("listening");

    let started = Instant::now();
    let error = client
        .connect::<TestGatewayProxy>(
            &format!("tcp://{}/no-such-endpoint", server_addr),
            Duration::from_secs(1),
        )
        .await
        .expect_err("unknown endpoint");
    assert!(error.is_connection(), "got {:?}", error);
    assert!(started.elapsed() < Duration::from_millis(1100));

    // A port nobody listens on.
    let closed_port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("local addr").port()
    };
    let started = Instant::now();
    let error = client
        .connect::<TestGatewayProxy>(
            &format!("tcp://127.0.0.1:{}/endpoint", closed_port),
            Duration::from_secs(1),
        )
        .await
        .expect_err("closed port");
    assert!(error.is_connection(), "got {:?}", error);
    assert!(started.elapsed() < Duration::from_millis(1100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_times_out_against_silent_listener() {
    let client = loopback_service("client").await;

    // Accepts connections but never answers a lookup.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let started = Instant::now();
    let error = client
        .connect::<TestGatewayProxy>(&format!("tcp://{}/x", addr), Duration::from_secs(1))
        .await
        .expect_err("no answer");
    let elapsed = started.elapsed();

    assert!(error.is_connection(), "got {:?}", error);
    assert!(error.to_string().contains("within"), "{}", error);
    assert!(elapsed >= Duration::from_millis(900), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1100), "{:?}", elapsed);
    silent.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oversized_reply_fails_caller() {
    let server = loopback_service("server").await;
    let client = loopback_service("client").await;
    let endpoint = Endpoint::new(&server, TestEndpoint::default()).expect("create endpoint");
    endpoint.start();

    let proxy: TestGatewayProxy = client
        .connect(&endpoint.address().to_string(), Duration::from_secs(2))
        .await
        .expect("connect");

    // 17 MiB reply, above the packet limit.
    let result = tokio::time::timeout(Duration::from_secs(5), proxy.echo("x".repeat(1 << 20), 17))
        .await
        .expect("call completes");
    let error = result.expect_err("reply too large");
    assert!(error.is_connection(), "got {:?}", error);

    // The connection stays usable.
    assert_eq!(proxy.foobar().await.expect("call"), 1337);
    let reply = proxy.echo("x".repeat(1 << 20), 4).await.expect("4 MiB reply");
    assert_eq!(reply.len(), 4 << 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_calls_fail_once_server_stops() {
    let server = loopback_service("server").await;
    let client = loopback_service("client").await;
    let endpoint = Endpoint::new(&server, TestEndpoint::default()).expect("create endpoint");
    endpoint.start();

    let proxy: TestGatewayProxy = client
        .connect(&endpoint.address().to_string(), Duration::from_secs(2))
        .await
        .expect("connect");
    assert_eq!(proxy.foobar().await.expect("call"), 1337);

    server.stop_service().await.expect("stop server");

    let result = tokio::time::timeout(Duration::from_secs(5), proxy.foobar())
        .await
        .expect("call completes");
    let error = result.expect_err("server gone");
    assert!(
        error.is_connection() || error.is_discarded(),
        "got {:?}",
        error
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wildcard_listener_publishes_advertised_ip() {
    init_tracing();
    let wildcard = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

    let error = RpcService::start(RpcServiceConfig::default().with_listen_address(wildcard))
        .await
        .expect_err("unroutable");
    assert!(matches!(error, ServiceError::UnroutableAddress(_)), "got {:?}", error);

    let server = RpcService::start(
        RpcServiceConfig::default()
            .with_name("server")
            .with_listen_address(wildcard)
            .with_advertised_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)),
    )
    .await
    .expect("start with advertised ip");
    let published = server.network_address().expect("listening");
    assert_eq!(published.socket_addr().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_ne!(published.socket_addr().port(), 0);

    let endpoint = Endpoint::new(&server, TestEndpoint::default()).expect("create endpoint");
    endpoint.start();
    let prefix = format!("tcp://127.0.0.1:{}/", published.socket_addr().port());
    assert!(endpoint.address().to_string().starts_with(&prefix));

    let client = loopback_service("client").await;
    let proxy: TestGatewayProxy = client
        .connect(&endpoint.address().to_string(), Duration::from_secs(2))
        .await
        .expect("connect");
    assert_eq!(proxy.foobar().await.expect("call"), 1337);
}
