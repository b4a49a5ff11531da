//! Gateway proxies: typed stand-ins that turn method calls into messages.
//!
//! A capability is declared as a trait annotated with
//! [`#[gateway]`](crate::gateway). The macro generates a `<Name>Proxy`
//! struct implementing the trait on top of a [`GatewayTarget`]: each
//! method packages its arguments into an invocation and posts it to the
//! target's mailbox, in-process or over the network.
//!
//! ```text
//! proxy.submit(task)
//!   ↓ GatewayTarget::ask("submit", (task,))
//! Invocation { TaskExecutor.submit, args, reply }
//!   ↓ Route::Local  → mailbox.post
//!   ↓ Route::Remote → Invoke frame → remote mailbox.post
//! RpcFuture<T> ← reply
//! ```

mod future;
mod invocation;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

pub use future::RpcFuture;
pub(crate) use invocation::{Invocation, Payload, ReplySender, complete};
pub use invocation::{MethodId, Reply};

use crate::address::Address;
use crate::codec::{JsonCodec, MessageCodec};
use crate::endpoint::RegisteredEndpoint;
use crate::error::RpcError;
use crate::transport::PeerConnection;

/// Anything bound to an endpoint address.
pub trait Gateway: Send + Sync {
    /// Address of the endpoint this gateway talks to.
    fn address(&self) -> &Address;
}

/// A generated proxy type for one capability.
///
/// Implemented by the `#[gateway]` macro; not meant to be implemented by
/// hand.
pub trait Capability: Gateway + Clone + Sized + 'static {
    /// Name identifying the capability in method identities.
    const NAME: &'static str;

    /// Bind a proxy to a resolved target.
    fn bind(target: GatewayTarget) -> Self;

    /// The target this proxy sends to.
    fn target(&self) -> &GatewayTarget;
}

#[derive(Clone)]
pub(crate) enum Route {
    Local(Arc<dyn RegisteredEndpoint>),
    Remote(Arc<PeerConnection>),
}

/// Resolved destination of a gateway proxy.
///
/// Stateless with respect to the endpoint; cheap to clone and safe to use
/// from many tasks at once.
#[derive(Clone)]
pub struct GatewayTarget {
    address: Address,
    capability: &'static str,
    route: Route,
}

impl GatewayTarget {
    pub(crate) fn local(endpoint: Arc<dyn RegisteredEndpoint>, capability: &'static str) -> Self {
        Self {
            address: endpoint.address().clone(),
            capability,
            route: Route::Local(endpoint),
        }
    }

    pub(crate) fn remote(
        address: Address,
        peer: Arc<PeerConnection>,
        capability: &'static str,
    ) -> Self {
        Self {
            address,
            capability,
            route: Route::Remote(peer),
        }
    }

    /// Address of the target endpoint.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Capability the proxy was created for.
    pub fn capability(&self) -> &'static str {
        self.capability
    }

    /// Send a call expecting a result.
    pub fn ask<A, R>(&self, method: &'static str, args: A) -> RpcFuture<R>
    where
        A: Serialize + Send + 'static,
        R: DeserializeOwned + Send + 'static,
    {
        let method = MethodId::new(self.capability, method);
        let (tx, rx) = oneshot::channel();
        if let Err(error) = self.send(method, args, Some(tx)) {
            return RpcFuture::failed(error);
        }
        RpcFuture::from_reply(rx)
    }

    /// Send a fire-and-forget call.
    ///
    /// Failures are logged where they are detected and never reported back.
    pub fn tell<A>(&self, method: &'static str, args: A)
    where
        A: Serialize + Send + 'static,
    {
        let method = MethodId::new(self.capability, method);
        if let Err(error) = self.send(method.clone(), args, None) {
            tracing::warn!(
                endpoint = %self.address,
                method = %method,
                error = %error,
                "fire-and-forget invocation not sent"
            );
        }
    }

    fn send<A>(&self, method: MethodId, args: A, reply: Option<ReplySender>) -> Result<(), RpcError>
    where
        A: Serialize + Send + 'static,
    {
        match &self.route {
            Route::Local(endpoint) => {
                endpoint.post(Invocation {
                    method,
                    args: Payload::local(args),
                    reply,
                });
                Ok(())
            }
            Route::Remote(peer) => {
                let args = JsonCodec
                    .encode(&args)
                    .map_err(|e| RpcError::connection(format!("failed to encode arguments: {}", e)))?;
                peer.invoke(self.address.name(), method, args, reply);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for GatewayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let route = match self.route {
            Route::Local(_) => "local",
            Route::Remote(_) => "remote",
        };
        f.debug_struct("GatewayTarget")
            .field("address", &self.address)
            .field("capability", &self.capability)
            .field("route", &route)
            .finish()
    }
}
