//! Endpoint addresses.
//!
//! An [`Address`] names one endpoint: a stable name plus the contact
//! information of the hosting service. Two forms exist:
//!
//! ```text
//! local://<service>/<name>        endpoint hosted by an in-process service
//! tcp://<ip>:<port>/<name>        endpoint reachable through a listening service
//! ```
//!
//! Addresses are immutable once assigned and round-trip through
//! `Display`/`FromStr`, so they can be handed to other processes as text.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const LOCAL_SCHEME: &str = "local://";
const TCP_SCHEME: &str = "tcp://";

/// Network address (IPv4/IPv6 + port).
///
/// # Examples
///
/// ```
/// use gantry::NetworkAddress;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let addr = NetworkAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 6123);
/// assert_eq!(addr.to_string(), "127.0.0.1:6123");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// IP address (IPv4 or IPv6).
    pub ip: IpAddr,
    /// Port number.
    pub port: u16,
}

impl NetworkAddress {
    /// Create a new network address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// Socket address suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Parse from string "ip:port" format.
    ///
    /// Supports both IPv4 (`127.0.0.1:6123`) and IPv6 (`[::1]:6123`) notation.
    ///
    /// # Errors
    ///
    /// Returns error if IP or port cannot be parsed.
    pub fn parse(s: &str) -> Result<Self, AddressParseError> {
        if let Some(bracket_end) = s.rfind(']') {
            if !s.starts_with('[') {
                return Err(AddressParseError::InvalidIp);
            }
            let ip_str = &s[1..bracket_end];
            let port_str = s
                .get(bracket_end + 2..)
                .ok_or(AddressParseError::MissingPort)?;
            let ip: IpAddr = ip_str.parse().map_err(|_| AddressParseError::InvalidIp)?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| AddressParseError::InvalidPort)?;
            Ok(Self::new(ip, port))
        } else {
            let (ip_str, port_str) = s.rsplit_once(':').ok_or(AddressParseError::MissingPort)?;
            let ip: IpAddr = ip_str.parse().map_err(|_| AddressParseError::InvalidIp)?;
            let port: u16 = port_str
                .parse()
                .map_err(|_| AddressParseError::InvalidPort)?;
            Ok(Self::new(ip, port))
        }
    }
}

impl From<SocketAddr> for NetworkAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// Error parsing an address from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    /// The address does not start with `local://` or `tcp://`.
    #[error("unknown address scheme (expected local:// or tcp://)")]
    UnknownScheme,
    /// No `/<name>` component follows the location.
    #[error("address has no endpoint name")]
    MissingName,
    /// The endpoint or service name is empty or contains a `/`.
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    /// The IP address could not be parsed.
    #[error("invalid IP address")]
    InvalidIp,
    /// The port number could not be parsed.
    #[error("invalid port number")]
    InvalidPort,
    /// No port separator (`:`) found in the input.
    #[error("missing port separator")]
    MissingPort,
}

/// Where the service hosting an endpoint can be contacted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    /// Hosted by the in-process service with this name.
    Local {
        /// Name of the hosting service.
        service: String,
    },
    /// Hosted by a service listening on this network address.
    Network(NetworkAddress),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local { service } => write!(f, "{}{}", LOCAL_SCHEME, service),
            Location::Network(addr) => write!(f, "{}{}", TCP_SCHEME, addr),
        }
    }
}

/// Globally resolvable identity of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    name: String,
    location: Location,
}

impl Address {
    /// Build an address, validating the endpoint name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if `name` is empty or contains a `/`.
    pub fn new(name: impl Into<String>, location: Location) -> Result<Self, AddressParseError> {
        let name = name.into();
        validate_name(&name)?;
        if let Location::Local { service } = &location {
            validate_name(service)?;
        }
        Ok(Self { name, location })
    }

    /// The endpoint name, unique within its hosting service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Contact information of the hosting service.
    pub fn location(&self) -> &Location {
        &self.location
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.location, self.name)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix(LOCAL_SCHEME) {
            let (service, name) = rest.split_once('/').ok_or(AddressParseError::MissingName)?;
            Address::new(
                name,
                Location::Local {
                    service: service.to_string(),
                },
            )
        } else if let Some(rest) = s.strip_prefix(TCP_SCHEME) {
            let (addr, name) = rest.split_once('/').ok_or(AddressParseError::MissingName)?;
            Address::new(name, Location::Network(NetworkAddress::parse(addr)?))
        } else {
            Err(AddressParseError::UnknownScheme)
        }
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), AddressParseError> {
    if name.is_empty() || name.contains('/') {
        return Err(AddressParseError::InvalidName(name.to_string()));
    }
    Ok(())
}
