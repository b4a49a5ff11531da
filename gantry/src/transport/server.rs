//! Accepting side of the network transport.
//!
//! Each accepted connection gets a task that reads frames, resolves names
//! against the service registry and posts invocations to endpoint
//! mailboxes. Replies are written back by per-invocation tasks so a slow
//! handler never blocks the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};

use super::frame::Frame;
use super::wire::read_packet;
use crate::error::RpcError;
use crate::proxy::{Invocation, Payload};
use crate::service::Registry;

/// Stops the accept loop and every connection it spawned.
pub(crate) struct ServerHandle {
    shutdown: watch::Sender<bool>,
}

impl ServerHandle {
    pub(crate) fn shutdown(self) {
        self.shutdown.send_replace(true);
    }
}

/// Serve `listener` until the returned handle is shut down.
pub(crate) fn serve(listener: TcpListener, registry: Arc<Registry>, runtime: &Handle) -> ServerHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    runtime.spawn(accept_loop(listener, registry, shutdown_rx));
    ServerHandle { shutdown }
}

async fn accept_loop(listener: TcpListener, registry: Arc<Registry>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer = %remote, error = %e, "failed to set TCP_NODELAY");
                    }
                    tokio::spawn(serve_connection(stream, remote, registry.clone(), shutdown.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to accept connection");
                }
            },
        }
    }
    tracing::debug!("listener closed");
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    registry: Arc<Registry>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(peer = %remote, "accepted connection");
    let (mut reader, mut writer) = stream.into_split();
    let (outbound, mut packets) = mpsc::unbounded_channel::<Vec<u8>>();

    let mut writer_shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.changed() => break,
                packet = packets.recv() => match packet {
                    Some(packet) => {
                        if let Err(e) = writer.write_all(&packet).await {
                            tracing::debug!(peer = %remote, error = %e, "write failed");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    loop {
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = read_packet(&mut reader) => read,
        };
        match read {
            Ok(Some((correlation, payload))) => match Frame::decode(&payload) {
                Ok(frame) => handle_frame(correlation, frame, &registry, &outbound),
                Err(e) => {
                    tracing::warn!(peer = %remote, error = %e, "undecodable frame");
                    // Fails the caller's pending request; unsolicited replies are ignored.
                    send(&outbound, correlation, &Frame::Reply { result: Err(e) });
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(peer = %remote, error = %e, "failed to read from peer");
                break;
            }
        }
    }
    tracing::debug!(peer = %remote, "connection closed");
}

fn handle_frame(
    correlation: u64,
    frame: Frame,
    registry: &Registry,
    outbound: &mpsc::UnboundedSender<Vec<u8>>,
) {
    match frame {
        Frame::Resolve { name } => {
            let found = registry.get(&name).is_some();
            send(outbound, correlation, &Frame::Resolved { found });
        }
        Frame::Invoke {
            target,
            method,
            args,
            expects_reply,
        } => {
            let (reply, waiter) = if expects_reply {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };

            let invocation = Invocation {
                method,
                args: Payload::Encoded(args),
                reply,
            };
            match registry.get(&target) {
                Some(endpoint) => endpoint.post(invocation),
                None => invocation.fail(RpcError::connection(format!("no endpoint named {:?}", target))),
            }

            if let Some(rx) = waiter {
                let outbound = outbound.clone();
                tokio::spawn(async move {
                    let result = match rx.await {
                        Ok(result) => result.and_then(Payload::into_bytes),
                        Err(_) => Err(RpcError::BrokenPromise),
                    };
                    send(&outbound, correlation, &Frame::Reply { result });
                });
            }
        }
        other => {
            tracing::warn!(correlation, frame = ?other, "unexpected frame from client");
        }
    }
}

fn send(outbound: &mpsc::UnboundedSender<Vec<u8>>, correlation: u64, frame: &Frame) {
    let packet = match frame.to_packet(correlation) {
        Ok(packet) => packet,
        Err(e) if matches!(frame, Frame::Reply { .. }) => {
            tracing::warn!(correlation, error = %e, "failed to encode reply");
            let fallback = Frame::Reply {
                result: Err(RpcError::connection(format!("failed to encode reply: {}", e))),
            };
            match fallback.to_packet(correlation) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::error!(correlation, error = %e, "failed to encode error reply");
                    return;
                }
            }
        }
        Err(e) => {
            tracing::error!(correlation, error = %e, "failed to encode frame");
            return;
        }
    };
    if outbound.send(packet).is_err() {
        tracing::debug!(correlation, "connection closed before reply was sent");
    }
}
