//! Binary codec for the TLV frame header.
//!
//! Wire format:
//! ```text
//! [msg_type:4][payload_len:4][payload:N]
//! ```
//! Total header size: 8 bytes.
//!
//! Both integers are little-endian on every host.  That is a protocol
//! constant: it matches peers that write native-order integers on
//! little-endian machines, and it must never depend on the local target.

use crate::protocol::messages::{Header, MessageType, HEADER_SIZE};
use thiserror::Error;

/// Errors that can occur while framing or reading headers.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the fixed header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The payload cannot be described by a 32-bit length field.
    #[error("payload of {0} bytes exceeds the u32 length field")]
    PayloadTooLarge(usize),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a header into its fixed 8-byte wire form.
///
/// # Examples
///
/// ```rust
/// use realtime_core::protocol::{decode_header, encode_header, MessageType};
///
/// let bytes = encode_header(MessageType::HevcData.wire_value(), 3);
/// assert_eq!(bytes, [1, 0, 0, 0, 3, 0, 0, 0]);
/// let header = decode_header(&bytes);
/// assert_eq!(header.length, 3);
/// ```
pub fn encode_header(message_type: u32, length: u32) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&message_type.to_le_bytes());
    buf[4..8].copy_from_slice(&length.to_le_bytes());
    buf
}

/// Decodes a header from exactly 8 bytes.  Infallible for well-sized input.
pub fn decode_header(bytes: &[u8; HEADER_SIZE]) -> Header {
    Header {
        message_type: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    }
}

/// Decodes a header from the start of an arbitrary slice.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] if fewer than 8 bytes are given.
pub fn decode_header_from_slice(bytes: &[u8]) -> Result<Header, ProtocolError> {
    let head: &[u8; HEADER_SIZE] = bytes
        .get(..HEADER_SIZE)
        .and_then(|s| s.try_into().ok())
        .ok_or(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        })?;
    Ok(decode_header(head))
}

/// Encodes a complete frame: header followed by the payload bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload length does not
/// fit in a `u32`.
///
/// # Examples
///
/// ```rust
/// use realtime_core::protocol::{encode_frame, MessageType};
///
/// let bytes = encode_frame(MessageType::HevcData, b"abc").unwrap();
/// assert_eq!(bytes, [1, 0, 0, 0, 3, 0, 0, 0, b'a', b'b', b'c']);
/// ```
pub fn encode_frame(message_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    encode_raw_frame(message_type.wire_value(), payload)
}

/// Like [`encode_frame`] but with an arbitrary numeric type value.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload length does not
/// fit in a `u32`.
pub fn encode_raw_frame(message_type: u32, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let length =
        u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&encode_header(message_type, length));
    buf.extend_from_slice(payload);
    Ok(buf)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip_preserves_fields() {
        for (ty, len) in [(0u32, 0u32), (1, 3), (0xDEAD_BEEF, u32::MAX)] {
            let header = decode_header(&encode_header(ty, len));
            assert_eq!(header, Header { message_type: ty, length: len });
        }
    }

    #[test]
    fn test_encode_header_is_little_endian() {
        // Arrange / Act
        let bytes = encode_header(0x0403_0201, 0x0807_0605);

        // Assert
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn test_encode_frame_abc_matches_wire_layout() {
        let bytes = encode_frame(MessageType::HevcData, b"abc").unwrap();
        assert_eq!(
            bytes,
            vec![0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, b'a', b'b', b'c']
        );
    }

    #[test]
    fn test_encode_frame_empty_payload_is_header_only() {
        let bytes = encode_frame(MessageType::Unknown, &[]).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(decode_header_from_slice(&bytes).unwrap().length, 0);
    }

    #[test]
    fn test_encode_raw_frame_keeps_unlisted_type_value() {
        let bytes = encode_raw_frame(77, b"x").unwrap();
        let header = decode_header_from_slice(&bytes).unwrap();
        assert_eq!(header.message_type, 77);
        assert_eq!(header.kind(), MessageType::Unknown);
    }

    #[test]
    fn test_decode_header_from_short_slice_returns_insufficient_data() {
        let result = decode_header_from_slice(&[0x01, 0x00, 0x00]);
        assert_eq!(
            result,
            Err(ProtocolError::InsufficientData {
                needed: HEADER_SIZE,
                available: 3
            })
        );
    }

    #[test]
    fn test_decode_header_from_slice_ignores_trailing_bytes() {
        let mut bytes = encode_header(1, 2).to_vec();
        bytes.extend_from_slice(&[9, 9, 9]);
        assert_eq!(
            decode_header_from_slice(&bytes).unwrap(),
            Header { message_type: 1, length: 2 }
        );
    }
}
