//! Configuration for an [`RpcService`](crate::RpcService).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Settings for one RPC service instance.
#[derive(Debug, Clone)]
pub struct RpcServiceConfig {
    /// Process-unique service name, used in `local://` addresses.
    pub name: String,

    /// Where to accept remote connections.
    ///
    /// `None` keeps the service in-process only.
    pub listen_address: Option<SocketAddr>,

    /// IP published in endpoint addresses instead of the bound one.
    ///
    /// Required when listening on an unspecified address such as
    /// `0.0.0.0`. The published port is always the bound port.
    pub advertised_ip: Option<IpAddr>,

    /// How long `stop_service` waits for endpoints to terminate.
    pub shutdown_timeout: Duration,

    /// Timeout used by `connect_default`.
    pub connect_timeout: Duration,
}

impl Default for RpcServiceConfig {
    fn default() -> Self {
        Self {
            name: format!("gantry-{}", uuid::Uuid::new_v4().simple()),
            listen_address: None,
            advertised_ip: None,
            shutdown_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RpcServiceConfig {
    /// In-process service with a generated name.
    pub fn local() -> Self {
        Self::default()
    }

    /// Service listening on an ephemeral port of the loopback interface.
    pub fn loopback() -> Self {
        Self::default().with_listen_address(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
    }

    /// Set the service name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Accept remote connections on `addr`.
    pub fn with_listen_address(mut self, addr: SocketAddr) -> Self {
        self.listen_address = Some(addr);
        self
    }

    /// Publish `ip` in endpoint addresses.
    pub fn with_advertised_ip(mut self, ip: IpAddr) -> Self {
        self.advertised_ip = Some(ip);
        self
    }

    /// The address peers should use to reach a listener bound to `bound`.
    ///
    /// `None` when neither the advertised nor the bound IP is routable.
    pub fn published_address(&self, bound: SocketAddr) -> Option<SocketAddr> {
        let ip = self.advertised_ip.unwrap_or(bound.ip());
        (!ip.is_unspecified()).then_some(SocketAddr::new(ip, bound.port()))
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the default connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
