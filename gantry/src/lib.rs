//! # Gantry
//!
//! Location-transparent RPC endpoints with serialized execution.
//!
//! This crate provides:
//! - **Endpoints**: objects hosting application logic, each drained by a
//!   single worker so handler code never runs concurrently with itself
//! - **Gateways**: typed proxies generated by [`#[gateway]`](gateway) that
//!   turn method calls into mailbox messages, in-process or over TCP
//! - **Lookup/connect**: bounded-time resolution of an [`Address`] into a
//!   gateway proxy through an [`RpcService`]
//! - **Failure propagation**: every outcome, including handler errors and
//!   shutdown hook failures, is delivered through futures
//!
//! # Example
//!
//! ```rust,ignore
//! use gantry::{DispatchTable, Endpoint, EndpointContext, Reply, RpcEndpoint, RpcFuture,
//!              RpcService, RpcServiceConfig, gateway};
//!
//! #[gateway]
//! pub trait Greeter {
//!     fn greet(&self, name: String) -> RpcFuture<String>;
//! }
//!
//! struct GreeterEndpoint;
//!
//! impl RpcEndpoint for GreeterEndpoint {
//!     fn register_capabilities(table: &mut DispatchTable<Self>) {
//!         GreeterProxy::register_handlers(table);
//!     }
//! }
//!
//! impl GreeterHandler for GreeterEndpoint {
//!     fn greet(&mut self, _ctx: &EndpointContext<Self>, name: String) -> Reply<String> {
//!         Reply::ok(format!("hello {}", name))
//!     }
//! }
//!
//! let service = RpcService::start(RpcServiceConfig::local()).await?;
//! let endpoint = Endpoint::with_name(&service, GreeterEndpoint, "greeter")?;
//! endpoint.start();
//!
//! let greeter: GreeterProxy = service
//!     .connect(&endpoint.address().to_string(), Duration::from_secs(1))
//!     .await?;
//! assert_eq!(greeter.greet("world".into()).await?, "hello world");
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

extern crate self as gantry;

// =============================================================================
// Modules
// =============================================================================

/// Endpoint addresses.
pub mod address;

/// Serialization for remote invocations.
pub mod codec;

/// Service configuration.
pub mod config;

/// Endpoints, lifecycle and dispatch.
pub mod endpoint;

/// Error types.
pub mod error;

/// Gateway proxies and invocation packaging.
pub mod proxy;

/// The RPC service: hosting, lookup and shutdown.
pub mod service;

/// TCP transport between services.
pub mod transport;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use address::{Address, AddressParseError, Location, NetworkAddress};
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use config::RpcServiceConfig;
pub use endpoint::{
    DispatchTable, Endpoint, EndpointContext, LifecycleState, RpcEndpoint, TerminationFuture,
};
pub use error::{
    ErrorEnvelope, HandlerError, HandlerMessage, HandlerPanic, RemoteFailure, RpcError,
    ServiceError,
};
pub use proxy::{Capability, Gateway, GatewayTarget, MethodId, Reply, RpcFuture};
pub use service::RpcService;

/// Turn a capability trait into a gateway proxy, a handler trait and a
/// dispatch registration function.
pub use gantry_derive::gateway;
