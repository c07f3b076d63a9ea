//! Message types carried by the TLV stream.
//!
//! The protocol has no magic number, version byte, or checksum.  Integrity
//! relies entirely on TCP, so the header layout below must never change
//! without coordinating with every deployed peer.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the fixed frame header in bytes: `type:u32` + `length:u32`.
pub const HEADER_SIZE: usize = 8;

// ── Message type codes ────────────────────────────────────────────────────────

/// Identifies the kind of payload carried by a frame.
///
/// The set is closed.  Values received from a peer that are not listed here
/// map to [`MessageType::Unknown`] for dispatch; the raw number is kept in the
/// [`Header`] so the stream stays in sync and the value still round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageType {
    /// Fallback for unrecognised or untagged payloads.
    Unknown = 0,
    /// An HEVC (H.265) Annex-B access unit.
    HevcData = 1,
}

impl MessageType {
    /// Maps a wire value to a message type, falling back to `Unknown`.
    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => MessageType::HevcData,
            _ => MessageType::Unknown,
        }
    }

    /// The numeric value written into the header.
    pub fn wire_value(self) -> u32 {
        self as u32
    }
}

impl From<MessageType> for u32 {
    fn from(value: MessageType) -> Self {
        value.wire_value()
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// Fixed 8-byte header prepended to every payload on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Raw message type value exactly as it appeared on the wire.
    pub message_type: u32,
    /// Exact number of payload bytes that follow this header.
    pub length: u32,
}

impl Header {
    pub fn new(message_type: MessageType, length: u32) -> Self {
        Self {
            message_type: message_type.wire_value(),
            length,
        }
    }

    /// The dispatch type for this header (`Unknown` for unrecognised values).
    pub fn kind(&self) -> MessageType {
        MessageType::from_wire(self.message_type)
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One complete message reconstructed from the byte stream.
///
/// Built by [`crate::FrameParser`] only once the header and the whole declared
/// payload are available.  Consumed exactly once by the dispatch step.
/// Cloning is cheap: the payload is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

impl Frame {
    pub fn message_type(&self) -> MessageType {
        self.header.kind()
    }

    /// Splits the frame into the `(payload, type)` pair handed to consumers.
    pub fn into_parts(self) -> (Bytes, MessageType) {
        let kind = self.header.kind();
        (self.payload, kind)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wire_maps_known_values() {
        assert_eq!(MessageType::from_wire(0), MessageType::Unknown);
        assert_eq!(MessageType::from_wire(1), MessageType::HevcData);
    }

    #[test]
    fn test_from_wire_falls_back_to_unknown() {
        assert_eq!(MessageType::from_wire(2), MessageType::Unknown);
        assert_eq!(MessageType::from_wire(u32::MAX), MessageType::Unknown);
    }

    #[test]
    fn test_header_keeps_raw_type_for_unknown_values() {
        // Arrange
        let header = Header {
            message_type: 0xBEEF,
            length: 3,
        };

        // Act / Assert
        assert_eq!(header.kind(), MessageType::Unknown);
        assert_eq!(header.message_type, 0xBEEF);
    }

    #[test]
    fn test_frame_into_parts_returns_payload_and_type() {
        let frame = Frame {
            header: Header::new(MessageType::HevcData, 2),
            payload: Bytes::from_static(&[0xAA, 0xBB]),
        };
        let (payload, ty) = frame.into_parts();
        assert_eq!(payload, vec![0xAAu8, 0xBB]);
        assert_eq!(ty, MessageType::HevcData);
    }
}
