//! The process-wide RPC service.
//!
//! An [`RpcService`] hosts endpoints, resolves addresses to gateway
//! proxies and, when configured with a listen address, accepts remote
//! invocations over TCP. It is created explicitly with
//! [`RpcService::start`] and torn down with [`RpcService::stop_service`].
//!
//! # Example
//!
//! ```rust,ignore
//! let service = RpcService::start(RpcServiceConfig::loopback()).await?;
//! let endpoint = Endpoint::with_name(&service, JobMaster::default(), "jobmaster")?;
//! endpoint.start();
//!
//! let gateway: JobMasterGatewayProxy = service
//!     .connect(&endpoint.address().to_string(), Duration::from_secs(1))
//!     .await?;
//! ```

mod registry;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::runtime::Handle;

pub(crate) use registry::Registry;

use crate::address::{Address, Location, NetworkAddress, validate_name};
use crate::config::RpcServiceConfig;
use crate::endpoint::{
    DispatchTable, Endpoint, EndpointContext, LocalEndpoint, Mailbox, RpcEndpoint,
    TerminationFuture, TerminationSignal, WorkerId, Worker,
};
use crate::error::{RpcError, ServiceError};
use crate::proxy::{Capability, GatewayTarget};
use crate::transport::{PeerPool, ServerHandle};

struct ServiceInner {
    config: RpcServiceConfig,
    runtime: Handle,
    registry: Arc<Registry>,
    network_address: Option<NetworkAddress>,
    server: Mutex<Option<ServerHandle>>,
    peers: PeerPool,
    /// Termination futures of the endpoints live when shutdown began.
    stopping: Mutex<Option<Vec<TerminationFuture>>>,
}

/// Handle to an RPC service. Cheap to clone.
#[derive(Clone)]
pub struct RpcService {
    inner: Arc<ServiceInner>,
}

impl RpcService {
    /// Start a service, binding its listener when one is configured.
    ///
    /// Must be called from within a Tokio runtime; endpoints of this
    /// service run on that runtime.
    ///
    /// # Errors
    ///
    /// - `ServiceError::InvalidName` if the service name is empty or contains a `/`
    /// - `ServiceError::Bind` if the listener cannot be bound
    /// - `ServiceError::UnroutableAddress` if the listener is bound to an
    ///   unspecified IP and no advertised IP is configured
    pub async fn start(config: RpcServiceConfig) -> Result<Self, ServiceError> {
        validate_name(&config.name).map_err(|_| ServiceError::InvalidName(config.name.clone()))?;
        let runtime = Handle::current();
        let registry = Arc::new(Registry::default());

        let (server, network_address) = match config.listen_address {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await.map_err(ServiceError::Bind)?;
                let local = listener.local_addr().map_err(ServiceError::Bind)?;
                let published = config
                    .published_address(local)
                    .ok_or(ServiceError::UnroutableAddress(local))?;
                let server = crate::transport::serve(listener, registry.clone(), &runtime);
                (Some(server), Some(NetworkAddress::from(published)))
            }
            None => (None, None),
        };

        tracing::info!(
            service = %config.name,
            listen = ?network_address.map(|a| a.to_string()),
            "rpc service started"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                peers: PeerPool::new(runtime.clone()),
                config,
                runtime,
                registry,
                network_address,
                server: Mutex::new(server),
                stopping: Mutex::new(None),
            }),
        })
    }

    /// The service name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The configuration the service was started with.
    pub fn config(&self) -> &RpcServiceConfig {
        &self.inner.config
    }

    /// Published address of the listener, if the service accepts remote
    /// connections.
    pub fn network_address(&self) -> Option<NetworkAddress> {
        self.inner.network_address
    }

    /// Whether `stop_service` has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.registry.is_closed()
    }

    /// Number of endpoints that have not terminated yet.
    pub fn endpoint_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Location embedded in the addresses of this service's endpoints.
    fn location(&self) -> Location {
        match self.inner.network_address {
            Some(addr) => Location::Network(addr),
            None => Location::Local {
                service: self.inner.config.name.clone(),
            },
        }
    }

    pub(crate) fn spawn_endpoint<E: RpcEndpoint>(
        &self,
        endpoint: E,
        name: Option<String>,
    ) -> Result<Endpoint<E>, ServiceError> {
        let name = name.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let address =
            Address::new(name.clone(), self.location()).map_err(|_| ServiceError::InvalidName(name.clone()))?;

        let mut table = DispatchTable::new();
        E::register_capabilities(&mut table);

        let (mailbox, inbox) = Mailbox::new();
        let (signal, termination) = TerminationSignal::new();
        let core = Arc::new(LocalEndpoint::new(
            address,
            mailbox,
            termination,
            table.capabilities(),
        ));
        self.inner.registry.insert(&name, core.clone())?;

        let handle = Endpoint::from_parts(core, self.clone());
        let ctx = EndpointContext::new(handle.clone(), WorkerId::next());
        self.inner
            .runtime
            .spawn(Worker::new(endpoint, table, ctx, inbox, signal).run());

        tracing::debug!(
            endpoint = %handle.address(),
            endpoint_type = std::any::type_name::<E>(),
            "endpoint created"
        );
        Ok(handle)
    }

    pub(crate) fn unregister(&self, address: &Address) {
        self.inner.registry.remove(address);
    }

    /// Resolve `address` and bind a gateway proxy of type `C`.
    ///
    /// Whether the endpoint implements `C` is only checked when a method
    /// is invoked.
    ///
    /// # Errors
    ///
    /// `RpcError::Connection` if the address is malformed, the endpoint is
    /// unknown or unreachable, or resolution takes longer than `timeout`.
    pub async fn connect<C: Capability>(&self, address: &str, timeout: Duration) -> Result<C, RpcError> {
        let parsed: Address = address
            .parse()
            .map_err(|e| RpcError::connection(format!("invalid address {:?}: {}", address, e)))?;
        self.connect_to(&parsed, timeout).await
    }

    /// [`connect`](Self::connect) with the configured connect timeout.
    pub async fn connect_default<C: Capability>(&self, address: &str) -> Result<C, RpcError> {
        self.connect(address, self.inner.config.connect_timeout).await
    }

    /// Resolve an already parsed address; see [`connect`](Self::connect).
    pub async fn connect_to<C: Capability>(
        &self,
        address: &Address,
        timeout: Duration,
    ) -> Result<C, RpcError> {
        match tokio::time::timeout(timeout, self.resolve(address, C::NAME)).await {
            Ok(Ok(target)) => {
                tracing::debug!(endpoint = %address, capability = C::NAME, "connected");
                Ok(C::bind(target))
            }
            Ok(Err(error)) => {
                tracing::debug!(endpoint = %address, error = %error, "connect failed");
                Err(error)
            }
            Err(_) => {
                tracing::debug!(endpoint = %address, ?timeout, "connect timed out");
                Err(RpcError::connection(format!(
                    "could not resolve {} within {:?}",
                    address, timeout
                )))
            }
        }
    }

    async fn resolve(&self, address: &Address, capability: &'static str) -> Result<GatewayTarget, RpcError> {
        if self.is_stopped() {
            return Err(RpcError::connection("rpc service is stopped"));
        }

        match address.location() {
            Location::Local { service } if *service == self.inner.config.name => {
                self.resolve_local(address, capability)
            }
            Location::Local { service } => Err(RpcError::connection(format!(
                "unknown in-process service {:?}",
                service
            ))),
            Location::Network(addr) if Some(*addr) == self.inner.network_address => {
                self.resolve_local(address, capability)
            }
            Location::Network(addr) => {
                let peer = self.inner.peers.get_or_connect(*addr).await?;
                if peer.resolve(address.name()).await? {
                    Ok(GatewayTarget::remote(address.clone(), peer, capability))
                } else {
                    Err(RpcError::connection(format!("no endpoint at {}", address)))
                }
            }
        }
    }

    fn resolve_local(&self, address: &Address, capability: &'static str) -> Result<GatewayTarget, RpcError> {
        self.inner
            .registry
            .get(address.name())
            .map(|endpoint| GatewayTarget::local(endpoint, capability))
            .ok_or_else(|| RpcError::connection(format!("no endpoint at {}", address)))
    }

    /// Stop the service.
    ///
    /// Sends a termination notice to every live endpoint, closes the
    /// listener and all peer connections, then waits up to the configured
    /// shutdown timeout for the endpoints to terminate. Later and
    /// concurrent calls wait on the same endpoints.
    ///
    /// # Errors
    ///
    /// `ServiceError::ShutdownTimedOut` if some endpoints are still running
    /// when the timeout expires.
    pub async fn stop_service(&self) -> Result<(), ServiceError> {
        let terminations = self.begin_shutdown();

        let waits = futures::future::join_all(terminations.iter().map(|t| t.wait()));
        match tokio::time::timeout(self.inner.config.shutdown_timeout, waits).await {
            Ok(results) => {
                for error in results.into_iter().filter_map(Result::err) {
                    tracing::warn!(error = %error, "endpoint teardown failed during service shutdown");
                }
                tracing::info!(service = %self.inner.config.name, "rpc service stopped");
                Ok(())
            }
            Err(_) => {
                let pending = terminations.iter().filter(|t| !t.is_done()).count();
                tracing::error!(pending, "endpoints did not terminate before the shutdown timeout");
                Err(ServiceError::ShutdownTimedOut(pending))
            }
        }
    }

    /// Close the service once and return the terminations to wait for.
    fn begin_shutdown(&self) -> Vec<TerminationFuture> {
        let terminations = {
            let mut stopping = self.inner.stopping.lock();
            if let Some(terminations) = stopping.as_ref() {
                return terminations.clone();
            }
            let endpoints = self.inner.registry.close();
            tracing::info!(
                service = %self.inner.config.name,
                endpoints = endpoints.len(),
                "stopping rpc service"
            );
            let terminations: Vec<_> = endpoints.iter().map(|e| e.terminate()).collect();
            *stopping = Some(terminations.clone());
            terminations
        };

        if let Some(server) = self.inner.server.lock().take() {
            server.shutdown();
        }
        self.inner.peers.close_all();
        terminations
    }
}

impl std::fmt::Debug for RpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcService")
            .field("name", &self.inner.config.name)
            .field("network_address", &self.inner.network_address)
            .finish_non_exhaustive()
    }
}
