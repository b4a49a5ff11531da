//! Lookup and connect against the in-process registry.

use std::time::{Duration, Instant};

use gantry::{Address, Endpoint, Gateway, Location, ServiceError};

use super::fixtures::{TestEndpoint, TestGateway, TestGatewayProxy, local_service};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_address_round_trips_through_connect() {
    let service = local_service().await;
    let endpoint = Endpoint::new(&service, TestEndpoint::default()).expect("create endpoint");
    endpoint.start();

    let text = endpoint.address().to_string();
    assert!(text.starts_with(&format!("local://{}/", service.name())));

    let proxy: TestGatewayProxy = service
        .connect(&text, Duration::from_secs(1))
        .await
        .expect("connect");
    assert_eq!(proxy.address(), endpoint.address());
    assert_eq!(proxy.foobar().await.expect("call"), 1337);

    let reparsed: Address = text.parse().expect("parse");
    let again: TestGatewayProxy = service
        .connect_to(&reparsed, Duration::from_secs(1))
        .await
        .expect("connect_to");
    assert_eq!(again.address(), endpoint.address());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_named_endpoint_address() {
    let service = local_service().await;
    let endpoint =
        Endpoint::with_name(&service, TestEndpoint::default(), "jobmaster").expect("create endpoint");
    assert_eq!(endpoint.address().name(), "jobmaster");
    assert_eq!(
        endpoint.address().location(),
        &Location::Local {
            service: service.name().to_string()
        }
    );

    let proxy: TestGatewayProxy = service
        .connect_default(&format!("local://{}/jobmaster", service.name()))
        .await
        .expect("connect by stable name");
    assert_eq!(proxy.address(), endpoint.address());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_endpoint_names_are_validated() {
    let service = local_service().await;
    let _first = Endpoint::with_name(&service, TestEndpoint::default(), "dup").expect("first");

    assert!(matches!(
        Endpoint::with_name(&service, TestEndpoint::default(), "dup"),
        Err(ServiceError::DuplicateName(name)) if name == "dup"
    ));
    assert!(matches!(
        Endpoint::with_name(&service, TestEndpoint::default(), "a/b"),
        Err(ServiceError::InvalidName(_))
    ));
    assert!(matches!(
        Endpoint::with_name(&service, TestEndpoint::default(), ""),
        Err(ServiceError::InvalidName(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_name_is_released_on_termination() {
    let service = local_service().await;
    let first = Endpoint::with_name(&service, TestEndpoint::default(), "reused").expect("first");
    first.shut_down().await.expect("terminate");

    let second = Endpoint::with_name(&service, TestEndpoint::default(), "reused").expect("second");
    second.start();
    let proxy: TestGatewayProxy = service
        .connect(&second.address().to_string(), Duration::from_secs(1))
        .await
        .expect("connect");
    assert_eq!(proxy.foobar().await.expect("call"), 1337);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connect_failures_are_bounded() {
    let service = local_service().await;
    let timeout = Duration::from_secs(1);
    let deadline = Duration::from_millis(1100);

    let cases = [
        "foobar".to_string(),
        format!("local://{}/no-such-endpoint", service.name()),
        "local://some-other-service/endpoint".to_string(),
    ];
    for address in cases {
        let started = Instant::now();
        let error = service
            .connect::<TestGatewayProxy>(&address, timeout)
            .await
            .expect_err("connect should fail");
        assert!(error.is_connection(), "{}: got {:?}", address, error);
        assert!(started.elapsed() < deadline, "{} took {:?}", address, started.elapsed());
    }
}
