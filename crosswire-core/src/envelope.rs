//! Length-prefixed envelope framing.
//!
//! Streaming RPCs (and enveloped unary payloads for the gRPC protocols) wrap
//! each message in an envelope:
//!
//! ```text
//! [flags:1][length:4][payload:length]
//! ```
//!
//! The length is a big-endian unsigned 32-bit integer covering only the
//! payload. Flag bits are protocol-specific and mutually exclusive in
//! practice; see [`envelope_flags`].

use bytes::Bytes;

use crate::compression::{BoxedPool, RequestCompression};
use crate::error::EnvelopeError;

/// Envelope flag bits.
pub mod envelope_flags {
    /// Bit 0: the payload is compressed.
    pub const COMPRESSED: u8 = 0b0000_0001;
    /// Bit 1: the payload is a Connect end-of-stream record (Connect streams only).
    pub const END_STREAM: u8 = 0b0000_0010;
    /// Bit 7: the payload is a trailers block (gRPC-Web only).
    pub const TRAILERS: u8 = 0b1000_0000;
}

/// Envelope header size (flags byte + length).
pub const ENVELOPE_HEADER_LEN: usize = 5;

/// Pack a message payload into an envelope, optionally compressing it.
///
/// The payload is compressed (and the compression flag set) only when it is
/// non-empty, a compression policy is supplied, the payload meets the
/// policy's byte threshold, and the pool's compressor succeeds. A failed
/// compression attempt degrades to sending the payload uncompressed with the
/// flag clear.
pub fn pack_envelope(payload: &[u8], compression: Option<&RequestCompression>) -> Bytes {
    if !payload.is_empty()
        && let Some(compression) = compression
        && compression.should_compress(payload)
        && let Ok(compressed) = compression.pool.compress(payload)
    {
        let mut frame = Vec::with_capacity(ENVELOPE_HEADER_LEN + compressed.len());
        frame.push(envelope_flags::COMPRESSED);
        frame.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        frame.extend_from_slice(&compressed);
        return Bytes::from(frame);
    }

    let mut frame = Vec::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
    frame.push(0);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Bytes::from(frame)
}

/// Unpack a fully framed envelope, decompressing the payload if needed.
///
/// Returns the flag byte and the unprefixed, decompressed payload. Empty
/// input yields `(0, empty)`.
///
/// **Expects a complete frame.** Partial frames are the reassembler's
/// responsibility; this function does not validate that `length` bytes are
/// present.
///
/// # Errors
///
/// Returns [`EnvelopeError::MissingCompressionPool`] if the compression flag
/// is set but no pool was supplied, or [`EnvelopeError::Decompression`] if
/// the pool fails.
pub fn unpack_envelope(
    envelope: &[u8],
    pool: Option<&BoxedPool>,
) -> Result<(u8, Bytes), EnvelopeError> {
    if envelope.is_empty() {
        return Ok((0, Bytes::new()));
    }

    let flags = envelope[0];
    let payload = &envelope[ENVELOPE_HEADER_LEN.min(envelope.len())..];
    if flags & envelope_flags::COMPRESSED != 0 {
        let pool = pool.ok_or(EnvelopeError::MissingCompressionPool)?;
        let decompressed = pool
            .decompress(payload)
            .map_err(|e| EnvelopeError::Decompression(e.to_string()))?;
        Ok((flags, decompressed))
    } else {
        Ok((flags, Bytes::copy_from_slice(payload)))
    }
}

/// Read the declared payload length from the first frame in a buffer.
///
/// Returns `-1` when fewer than [`ENVELOPE_HEADER_LEN`] bytes are available.
/// Pure; does not consume or validate the buffer.
pub fn message_length(buffer: &[u8]) -> i64 {
    if buffer.len() < ENVELOPE_HEADER_LEN {
        return -1;
    }

    u32::from_be_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]) as i64
}
