//! Wire format for transport frames.
//!
//! Packet format: `[length:4][checksum:4][correlation:8][payload:N]`
//!
//! - **length**: Total packet size including header (little-endian u32)
//! - **checksum**: CRC32C of (correlation + payload) for integrity verification
//! - **correlation**: Matches a reply to its request (little-endian u64)
//! - **payload**: Codec-encoded frame

use tokio::io::{AsyncRead, AsyncReadExt};

/// Header size: 4 (length) + 4 (checksum) + 8 (correlation) = 16 bytes.
pub const HEADER_SIZE: usize = 16;

/// Maximum payload size (16MB).
///
/// Packets larger than this are rejected to prevent memory exhaustion.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Wire format error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the packet.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Checksum verification failed - data was corrupted.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Expected checksum from header.
        expected: u32,
        /// Computed checksum from data.
        actual: u32,
    },

    /// Payload exceeds maximum allowed size.
    #[error("packet too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    PacketTooLarge {
        /// Actual payload size in bytes.
        size: usize,
    },

    /// Length field has an invalid value.
    #[error("invalid packet length: {length}")]
    InvalidLength {
        /// The invalid length value from the header.
        length: u32,
    },

    /// Reading from the connection failed.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for WireError {
    fn from(error: std::io::Error) -> Self {
        WireError::Io(error.to_string())
    }
}

/// Packet header for wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet size including header.
    pub length: u32,
    /// CRC32C checksum of (correlation + payload).
    pub checksum: u32,
    /// Request/reply correlation id.
    pub correlation: u64,
}

impl PacketHeader {
    /// Serialize header into buffer (must be at least HEADER_SIZE bytes).
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..16].copy_from_slice(&self.correlation.to_le_bytes());
    }

    /// Deserialize header from buffer.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientData` if buffer is smaller than HEADER_SIZE.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::InsufficientData {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        }

        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let checksum = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let correlation = u64::from_le_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);

        Ok(Self {
            length,
            checksum,
            correlation,
        })
    }

    fn validate(&self) -> Result<(), WireError> {
        if self.length < HEADER_SIZE as u32 {
            return Err(WireError::InvalidLength {
                length: self.length,
            });
        }
        let size = self.length as usize - HEADER_SIZE;
        if size > MAX_PAYLOAD_SIZE {
            return Err(WireError::PacketTooLarge { size });
        }
        Ok(())
    }
}

/// Compute CRC32C checksum over correlation + payload.
fn compute_checksum(correlation: u64, payload: &[u8]) -> u32 {
    let crc = crc32c::crc32c(&correlation.to_le_bytes());
    crc32c::crc32c_append(crc, payload)
}

fn verify_checksum(header: &PacketHeader, payload: &[u8]) -> Result<(), WireError> {
    let computed = compute_checksum(header.correlation, payload);
    if computed != header.checksum {
        return Err(WireError::ChecksumMismatch {
            expected: header.checksum,
            actual: computed,
        });
    }
    Ok(())
}

/// Serialize a packet with correlation id and payload.
///
/// Returns: `[length:4][checksum:4][correlation:8][payload:N]`
///
/// # Errors
///
/// Returns `PacketTooLarge` if payload exceeds MAX_PAYLOAD_SIZE.
pub fn serialize_packet(correlation: u64, payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::PacketTooLarge {
            size: payload.len(),
        });
    }

    let total_length = HEADER_SIZE + payload.len();
    let mut data = vec![0u8; total_length];

    let header = PacketHeader {
        length: total_length as u32,
        checksum: compute_checksum(correlation, payload),
        correlation,
    };

    header.serialize_into(&mut data[..HEADER_SIZE]);
    data[HEADER_SIZE..].copy_from_slice(payload);

    Ok(data)
}

/// Try to deserialize from a buffer that may contain partial data.
///
/// # Returns
///
/// - `Ok(Some((correlation, payload, consumed)))` if a complete packet was parsed
/// - `Ok(None)` if more data is needed (not an error condition)
/// - `Err` if data is malformed
pub fn try_deserialize_packet(data: &[u8]) -> Result<Option<(u64, Vec<u8>, usize)>, WireError> {
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }

    let header = PacketHeader::deserialize(data)?;
    header.validate()?;

    let expected_len = header.length as usize;
    if data.len() < expected_len {
        return Ok(None);
    }

    let payload = &data[HEADER_SIZE..expected_len];
    verify_checksum(&header, payload)?;

    Ok(Some((header.correlation, payload.to_vec(), expected_len)))
}

/// Read one packet from a stream.
///
/// Returns `Ok(None)` when the stream ends cleanly between packets.
///
/// # Errors
///
/// - `Io` if the stream fails or ends inside a packet
/// - `InvalidLength`, `PacketTooLarge`, `ChecksumMismatch` for malformed packets
pub async fn read_packet<R>(reader: &mut R) -> Result<Option<(u64, Vec<u8>)>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(WireError::Io("connection closed inside packet header".to_string()));
        }
        filled += n;
    }

    let header = PacketHeader::deserialize(&header_buf)?;
    header.validate()?;

    let mut payload = vec![0u8; header.length as usize - HEADER_SIZE];
    reader.read_exact(&mut payload).await?;
    verify_checksum(&header, &payload)?;

    Ok(Some((header.correlation, payload)))
}
