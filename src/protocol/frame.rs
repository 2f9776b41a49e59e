//! Length-prefixed binary frames
//!
//! Frame format:
//! ```text
//! +-------------------+------------------+
//! | length            | payload          |
//! | (4 bytes, i32 LE) | (length bytes)   |
//! +-------------------+------------------+
//! ```
//!
//! The same prefix is used by text messages on TCP and by raw frames on UDP.
//! Frame payloads are opaque at this layer.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ChatError, Result};
use crate::transport::Endpoint;
use crate::transport::udp::DEFAULT_MAX_DATAGRAM_SIZE;

/// Length prefix size: 4 bytes, signed, little-endian
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest frame payload that fits in one default-sized datagram
pub const MAX_FRAME_SIZE: usize = DEFAULT_MAX_DATAGRAM_SIZE - LENGTH_PREFIX_SIZE;

/// Validate a raw length prefix against `limit`
fn checked_length(raw: i32, limit: usize) -> Result<usize> {
    if raw < 0 {
        return Err(ChatError::protocol(format!("Negative length prefix: {}", raw)));
    }
    let len = raw as usize;
    if len > limit {
        return Err(ChatError::protocol(format!(
            "Payload too large: {} bytes (max: {})",
            len, limit
        )));
    }
    Ok(len)
}

/// Length prefix for a payload of `len` bytes
fn prefix_for(len: usize) -> Result<i32> {
    i32::try_from(len)
        .map_err(|_| ChatError::protocol(format!("Payload too large: {} bytes", len)))
}

/// Append `payload` with its length prefix to `buf`
pub(crate) fn encode_prefixed(payload: &[u8], buf: &mut BytesMut) -> Result<()> {
    let len = prefix_for(payload.len())?;
    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_i32_le(len);
    buf.put_slice(payload);
    Ok(())
}

/// Try to split one prefixed payload off the front of `buf`.
/// Returns Ok(None) if more data is needed.
pub(crate) fn decode_prefixed(buf: &mut BytesMut, limit: usize) -> Result<Option<Bytes>> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    // Peek at the prefix without consuming
    let raw = (&buf[..LENGTH_PREFIX_SIZE]).get_i32_le();
    let len = checked_length(raw, limit)?;

    if buf.len() < LENGTH_PREFIX_SIZE + len {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Read one prefixed payload from an endpoint
pub(crate) async fn read_prefixed<E: Endpoint>(endpoint: &E, limit: usize) -> Result<Bytes> {
    let header = endpoint.read(LENGTH_PREFIX_SIZE).await?;
    let len = checked_length((&header[..]).get_i32_le(), limit)?;
    Ok(endpoint.read(len).await?)
}

/// Write one prefixed payload to an endpoint as a single send
pub(crate) async fn write_prefixed<E: Endpoint>(endpoint: &E, payload: &[u8]) -> Result<()> {
    let len = prefix_for(payload.len())?;

    let mut outbox = endpoint.outbox().await;
    outbox.reset();
    outbox.put(&len.to_le_bytes());
    outbox.put(payload);
    outbox.send().await?;
    Ok(())
}

/// A UDP-carried binary blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Bytes,
}

impl Frame {
    /// Create a new frame from a payload
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Get the total encoded size of this frame
    pub fn encoded_size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.bytes.len()
    }

    /// Encode this frame into a buffer
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        encode_prefixed(&self.bytes, buf)
    }

    /// Encode this frame into a new Bytes
    pub fn encode_to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Try to decode a frame from a buffer
    /// Returns Ok(Some(frame)) if successful, Ok(None) if more data needed
    pub fn decode(buf: &mut BytesMut, limit: usize) -> Result<Option<Frame>> {
        Ok(decode_prefixed(buf, limit)?.map(Frame::new))
    }

    /// Decode a single frame from a complete buffer (no streaming)
    pub fn decode_complete(data: &[u8], limit: usize) -> Result<Frame> {
        let mut buf = BytesMut::from(data);
        Frame::decode(&mut buf, limit)?
            .ok_or_else(|| ChatError::protocol("Incomplete frame"))
    }

    /// Block until one frame arrives on `endpoint`
    pub async fn read_from<E: Endpoint>(endpoint: &E, limit: usize) -> Result<Frame> {
        Ok(Frame::new(read_prefixed(endpoint, limit).await?))
    }

    /// Send this frame to `endpoint`
    pub async fn send_to<E: Endpoint>(&self, endpoint: &E) -> Result<()> {
        write_prefixed(endpoint, &self.bytes).await
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[frame] len: {}", self.bytes.len())?;
        for (i, byte) in self.bytes.iter().enumerate() {
            match i % 16 {
                0 => write!(f, "\n  ")?,
                8 => write!(f, "  ")?,
                _ => write!(f, " ")?,
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
