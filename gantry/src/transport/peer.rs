//! Outbound connections to other services.
//!
//! One [`PeerConnection`] per remote service, shared by every gateway
//! proxy targeting it. Requests carry a correlation id; the read loop
//! matches replies to their waiting callers. When the connection drops,
//! every call still waiting on it fails with a connection error.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::frame::Frame;
use super::wire::read_packet;
use crate::address::NetworkAddress;
use crate::error::RpcError;
use crate::proxy::{MethodId, Payload, ReplySender, complete};

enum PendingReply {
    Resolve(oneshot::Sender<Result<bool, RpcError>>),
    Invoke { method: MethodId, reply: ReplySender },
}

impl PendingReply {
    fn fail(self, error: RpcError) {
        match self {
            PendingReply::Resolve(tx) => {
                let _ = tx.send(Err(error));
            }
            PendingReply::Invoke { method, reply } => complete(&method, Some(reply), Err(error)),
        }
    }
}

#[derive(Default)]
struct PendingState {
    replies: HashMap<u64, PendingReply>,
    closed: bool,
}

/// Connection to one remote service.
pub(crate) struct PeerConnection {
    remote: NetworkAddress,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    pending: Mutex<PendingState>,
    next_correlation: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerConnection {
    /// Take over a connected stream and start its reader and writer tasks.
    pub(crate) fn spawn(stream: TcpStream, remote: NetworkAddress, runtime: &Handle) -> Arc<Self> {
        let (reader, mut writer) = stream.into_split();
        let (outbound, mut packets) = mpsc::unbounded_channel::<Vec<u8>>();

        let peer = Arc::new(Self {
            remote,
            outbound,
            pending: Mutex::new(PendingState::default()),
            next_correlation: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
        });

        let writer_peer = Arc::downgrade(&peer);
        let writer_task = runtime.spawn(async move {
            while let Some(packet) = packets.recv().await {
                if let Err(e) = writer.write_all(&packet).await {
                    tracing::debug!(peer = %remote, error = %e, "write failed");
                    break;
                }
            }
            if let Some(peer) = writer_peer.upgrade() {
                peer.close("connection lost");
            }
        });

        let reader_task = runtime.spawn(Self::read_loop(Arc::downgrade(&peer), reader, remote));

        peer.tasks.lock().extend([writer_task, reader_task]);
        tracing::debug!(peer = %remote, "peer connection established");
        peer
    }

    async fn read_loop(peer: std::sync::Weak<Self>, mut reader: OwnedReadHalf, remote: NetworkAddress) {
        loop {
            match read_packet(&mut reader).await {
                Ok(Some((correlation, payload))) => {
                    let Some(peer) = peer.upgrade() else { return };
                    peer.handle_packet(correlation, &payload);
                }
                Ok(None) => {
                    tracing::debug!(peer = %remote, "peer closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(peer = %remote, error = %e, "failed to read from peer");
                    break;
                }
            }
        }
        if let Some(peer) = peer.upgrade() {
            peer.close("connection lost");
        }
    }

    fn handle_packet(&self, correlation: u64, payload: &[u8]) {
        let frame = match Frame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(peer = %self.remote, correlation, error = %e, "undecodable frame");
                let pending = self.pending.lock().replies.remove(&correlation);
                if let Some(pending) = pending {
                    pending.fail(e);
                }
                return;
            }
        };
        let pending = self.pending.lock().replies.remove(&correlation);

        match (frame, pending) {
            (Frame::Resolved { found }, Some(PendingReply::Resolve(tx))) => {
                let _ = tx.send(Ok(found));
            }
            (Frame::Reply { result }, Some(PendingReply::Invoke { method, reply })) => {
                complete(&method, Some(reply), result.map(Payload::Encoded));
            }
            (frame, Some(other)) => {
                tracing::warn!(peer = %self.remote, correlation, ?frame, "reply does not match request");
                other.fail(RpcError::connection("protocol error: unexpected reply"));
            }
            (frame, None) => {
                tracing::warn!(peer = %self.remote, correlation, ?frame, "unsolicited frame");
            }
        }
    }

    /// Whether the connection has been closed.
    pub(crate) fn is_closed(&self) -> bool {
        self.pending.lock().closed
    }

    /// Ask the remote service whether it hosts an endpoint named `name`.
    pub(crate) async fn resolve(&self, name: &str) -> Result<bool, RpcError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            PendingReply::Resolve(tx),
            &Frame::Resolve {
                name: name.to_string(),
            },
        );
        rx.await
            .unwrap_or_else(|_| Err(RpcError::connection("connection lost")))
    }

    /// Send an invocation to the endpoint named `target`.
    ///
    /// Failures are delivered through `reply`, or logged for
    /// fire-and-forget calls.
    pub(crate) fn invoke(
        &self,
        target: &str,
        method: MethodId,
        args: Vec<u8>,
        reply: Option<ReplySender>,
    ) {
        let frame = Frame::Invoke {
            target: target.to_string(),
            method: method.clone(),
            args,
            expects_reply: reply.is_some(),
        };
        match reply {
            Some(reply) => self.request(PendingReply::Invoke { method, reply }, &frame),
            None => {
                let correlation = self.next_correlation.fetch_add(1, Ordering::Relaxed);
                if let Err(error) = self.send_frame(correlation, &frame) {
                    complete(&method, None, Err(error));
                }
            }
        }
    }

    fn request(&self, pending: PendingReply, frame: &Frame) {
        let correlation = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.pending.lock();
            if state.closed {
                drop(state);
                pending.fail(RpcError::connection(format!(
                    "connection to {} is closed",
                    self.remote
                )));
                return;
            }
            state.replies.insert(correlation, pending);
        }

        if let Err(error) = self.send_frame(correlation, frame)
            && let Some(pending) = self.pending.lock().replies.remove(&correlation)
        {
            pending.fail(error);
        }
    }

    fn send_frame(&self, correlation: u64, frame: &Frame) -> Result<(), RpcError> {
        let packet = frame.to_packet(correlation)?;
        self.outbound
            .send(packet)
            .map_err(|_| RpcError::connection(format!("connection to {} is closed", self.remote)))
    }

    /// Close the connection, failing every call still waiting on it.
    pub(crate) fn close(&self, reason: &str) {
        let drained: Vec<PendingReply> = {
            let mut state = self.pending.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.replies.drain().map(|(_, pending)| pending).collect()
        };

        tracing::debug!(peer = %self.remote, reason, pending = drained.len(), "closing peer connection");
        for pending in drained {
            pending.fail(RpcError::connection(format!(
                "{} ({})",
                reason, self.remote
            )));
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

/// Connections of one service to its peers, keyed by remote address.
pub(crate) struct PeerPool {
    runtime: Handle,
    peers: Mutex<HashMap<NetworkAddress, Arc<PeerConnection>>>,
}

impl PeerPool {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Reuse the open connection to `addr` or establish a new one.
    pub(crate) async fn get_or_connect(&self, addr: NetworkAddress) -> Result<Arc<PeerConnection>, RpcError> {
        let existing = self.peers.lock().get(&addr).cloned();
        if let Some(peer) = existing
            && !peer.is_closed()
        {
            return Ok(peer);
        }

        let stream = TcpStream::connect(addr.socket_addr())
            .await
            .map_err(|e| RpcError::connection(format!("failed to connect to {}: {}", addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %addr, error = %e, "failed to set TCP_NODELAY");
        }
        let peer = PeerConnection::spawn(stream, addr, &self.runtime);

        let mut peers = self.peers.lock();
        match peers.get(&addr) {
            // Another caller connected first; keep its connection.
            Some(existing) if !existing.is_closed() => {
                let existing = existing.clone();
                drop(peers);
                peer.close("duplicate connection");
                Ok(existing)
            }
            _ => {
                peers.insert(addr, peer.clone());
                Ok(peer)
            }
        }
    }

    /// Close every connection.
    pub(crate) fn close_all(&self) {
        let peers: Vec<_> = self.peers.lock().drain().map(|(_, peer)| peer).collect();
        for peer in peers {
            peer.close("rpc service stopped");
        }
    }
}
