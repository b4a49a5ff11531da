//! Frames exchanged between services.

use serde::{Deserialize, Serialize};

use crate::codec::{JsonCodec, MessageCodec};
use crate::error::RpcError;
use crate::proxy::MethodId;

use super::wire::{WireError, serialize_packet};

/// Size of the header length prefix inside a packet payload.
const HEADER_LEN_SIZE: usize = 4;

const NO_BODY: &[u8] = &[];

/// One message on a service-to-service connection.
///
/// `Resolve`/`Invoke` travel from caller to host; `Resolved`/`Reply` come
/// back carrying the correlation id of the request they answer.
///
/// Packet payload layout: `[header_len:4][header:json][body]`. The body
/// holds the already encoded arguments of an `Invoke` or the value of a
/// successful `Reply` verbatim, so large values are not inflated by the
/// JSON header encoding.
#[derive(Debug, Clone)]
pub(crate) enum Frame {
    /// Does an endpoint with this name exist?
    Resolve { name: String },
    /// Answer to `Resolve`.
    Resolved { found: bool },
    /// Invoke a method on the named endpoint.
    Invoke {
        target: String,
        method: MethodId,
        args: Vec<u8>,
        expects_reply: bool,
    },
    /// Outcome of an `Invoke` that expected a reply.
    Reply { result: Result<Vec<u8>, RpcError> },
}

#[derive(Serialize, Deserialize)]
enum FrameHeader {
    Resolve { name: String },
    Resolved { found: bool },
    Invoke {
        target: String,
        method: MethodId,
        expects_reply: bool,
    },
    Reply { error: Option<RpcError> },
}

impl Frame {
    fn split(&self) -> (FrameHeader, &[u8]) {
        match self {
            Frame::Resolve { name } => (FrameHeader::Resolve { name: name.clone() }, NO_BODY),
            Frame::Resolved { found } => (FrameHeader::Resolved { found: *found }, NO_BODY),
            Frame::Invoke {
                target,
                method,
                args,
                expects_reply,
            } => (
                FrameHeader::Invoke {
                    target: target.clone(),
                    method: method.clone(),
                    expects_reply: *expects_reply,
                },
                args.as_slice(),
            ),
            Frame::Reply { result: Ok(value) } => (FrameHeader::Reply { error: None }, value.as_slice()),
            Frame::Reply { result: Err(error) } => (
                FrameHeader::Reply {
                    error: Some(error.clone()),
                },
                NO_BODY,
            ),
        }
    }

    /// Encode into a complete wire packet.
    pub(crate) fn to_packet(&self, correlation: u64) -> Result<Vec<u8>, RpcError> {
        let (header, body) = self.split();
        let header = JsonCodec
            .encode(&header)
            .map_err(|e| RpcError::connection(format!("failed to encode frame: {}", e)))?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| RpcError::connection("frame header too large"))?;

        let mut payload = Vec::with_capacity(HEADER_LEN_SIZE + header.len() + body.len());
        payload.extend_from_slice(&header_len.to_le_bytes());
        payload.extend_from_slice(&header);
        payload.extend_from_slice(body);

        serialize_packet(correlation, &payload)
            .map_err(|e: WireError| RpcError::connection(e.to_string()))
    }

    pub(crate) fn decode(payload: &[u8]) -> Result<Self, RpcError> {
        let Some((len_bytes, rest)) = payload.split_first_chunk::<HEADER_LEN_SIZE>() else {
            return Err(RpcError::connection("failed to decode frame: truncated header"));
        };
        let header_len = u32::from_le_bytes(*len_bytes) as usize;
        if rest.len() < header_len {
            return Err(RpcError::connection(format!(
                "failed to decode frame: header of {} bytes exceeds payload of {}",
                header_len,
                rest.len()
            )));
        }
        let (header, body) = rest.split_at(header_len);
        let header: FrameHeader = JsonCodec
            .decode(header)
            .map_err(|e| RpcError::connection(format!("failed to decode frame: {}", e)))?;

        Ok(match header {
            FrameHeader::Resolve { name } => Frame::Resolve { name },
            FrameHeader::Resolved { found } => Frame::Resolved { found },
            FrameHeader::Invoke {
                target,
                method,
                expects_reply,
            } => Frame::Invoke {
                target,
                method,
                args: body.to_vec(),
                expects_reply,
            },
            FrameHeader::Reply { error: Some(error) } => Frame::Reply { result: Err(error) },
            FrameHeader::Reply { error: None } => Frame::Reply {
                result: Ok(body.to_vec()),
            },
        })
    }
}
