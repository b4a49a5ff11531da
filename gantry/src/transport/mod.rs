//! TCP transport between services.
//!
//! Frames ride a length-prefixed, checksummed packet format (see
//! [`wire`]) and are encoded with the [`JsonCodec`](crate::JsonCodec).

mod frame;
mod peer;
mod server;
pub mod wire;

pub(crate) use peer::{PeerConnection, PeerPool};
pub(crate) use server::{ServerHandle, serve};
