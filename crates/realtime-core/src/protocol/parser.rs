//! Incremental TLV frame parser.
//!
//! TCP is a *stream* protocol: one `read()` may return part of a header, a
//! header and half a payload, or several frames at once.  [`FrameParser`]
//! accumulates whatever arrives and hands out complete [`Frame`]s in wire
//! order.
//!
//! # Parse steps
//!
//! 1. Wait until 8 header bytes are buffered.  Partial header bytes are left
//!    untouched.
//! 2. Decode the header exactly once and remember it as the pending header.
//! 3. Wait until `length` payload bytes are buffered, then emit the frame.
//! 4. Repeat from step 1.
//!
//! When the parser has nothing complete it simply returns `None`; the caller
//! pushes more bytes and asks again.  State survives across calls, so a
//! pending header is never decoded twice.

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::protocol::codec::decode_header;
use crate::protocol::messages::{Frame, Header, MessageType, HEADER_SIZE};

/// Stateful, per-connection frame reassembler.
///
/// Payloads are split off the receive buffer without copying: a [`Frame`]
/// shares the allocation the bytes were received into.
#[derive(Debug, Default)]
pub struct FrameParser {
    /// Received bytes not yet handed out.
    buf: BytesMut,
    /// Header already decoded whose payload is not fully buffered yet.
    pending: Option<Header>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete frame, or `None` if more input is needed.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                let head: &[u8; HEADER_SIZE] = self.buf.get(..HEADER_SIZE)?.try_into().ok()?;
                let header = decode_header(head);
                self.buf.advance(HEADER_SIZE);
                self.pending = Some(header);
                if header.kind() == MessageType::Unknown && header.message_type != 0 {
                    trace!("framing unrecognised message type {}", header.message_type);
                }
                header
            }
        };

        let len = header.length as usize;
        if self.buf.len() < len {
            return None;
        }
        let payload = self.buf.split_to(len).freeze();
        self.pending = None;
        Some(Frame { header, payload })
    }

    /// Iterator over every frame that is complete right now.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { parser: self }
    }

    /// Number of bytes still missing before the next parse step can finish.
    pub fn bytes_needed(&self) -> usize {
        let available = self.buf.len();
        match self.pending {
            Some(header) => (header.length as usize).saturating_sub(available),
            None => HEADER_SIZE.saturating_sub(available),
        }
    }

    /// `true` while bytes of an incomplete frame are held.
    pub fn has_partial_frame(&self) -> bool {
        self.pending.is_some() || !self.buf.is_empty()
    }

    /// Discards all buffered input, including a pending header.
    ///
    /// Used when the stream ends mid-frame: a partial frame is never delivered.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pending = None;
    }
}

/// Draining iterator returned by [`FrameParser::frames`].
pub struct Frames<'a> {
    parser: &'a mut FrameParser,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.parser.next_frame()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{encode_frame, encode_header, encode_raw_frame};

    fn sample_stream() -> (Vec<u8>, Vec<(Vec<u8>, MessageType)>) {
        let frames = vec![
            (b"abc".to_vec(), MessageType::HevcData),
            (Vec::new(), MessageType::Unknown),
            ((0..=255u8).collect::<Vec<_>>(), MessageType::HevcData),
            (b"z".to_vec(), MessageType::Unknown),
        ];
        let mut bytes = Vec::new();
        for (payload, ty) in &frames {
            bytes.extend_from_slice(&encode_frame(*ty, payload).unwrap());
        }
        (bytes, frames)
    }

    fn parse_chunked(bytes: &[u8], chunk: usize) -> Vec<(Vec<u8>, MessageType)> {
        let mut parser = FrameParser::new();
        let mut out = Vec::new();
        for piece in bytes.chunks(chunk) {
            parser.push(piece);
            out.extend(
                parser
                    .frames()
                    .map(|frame| (frame.payload.to_vec(), frame.message_type())),
            );
        }
        out
    }

    #[test]
    fn test_single_frame_abc_is_emitted_once() {
        // Arrange
        let mut parser = FrameParser::new();
        parser.push(&[0x01, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, b'a', b'b', b'c']);

        // Act
        let frames: Vec<_> = parser.frames().collect();

        // Assert
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type(), MessageType::HevcData);
        assert_eq!(frames[0].payload, &b"abc"[..]);
        assert!(!parser.has_partial_frame());
    }

    #[test]
    fn test_whole_stream_yields_all_frames_in_order() {
        let (bytes, expected) = sample_stream();
        assert_eq!(parse_chunked(&bytes, bytes.len()), expected);
    }

    #[test]
    fn test_one_byte_at_a_time_matches_whole_feed() {
        let (bytes, expected) = sample_stream();
        assert_eq!(parse_chunked(&bytes, 1), expected);
    }

    #[test]
    fn test_every_chunk_size_matches_whole_feed() {
        let (bytes, expected) = sample_stream();
        for chunk in 1..=bytes.len() {
            assert_eq!(parse_chunked(&bytes, chunk), expected, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_zero_length_payload_does_not_stall() {
        // Arrange: empty frame immediately followed by a non-empty one
        let mut bytes = encode_frame(MessageType::Unknown, &[]).unwrap();
        bytes.extend_from_slice(&encode_frame(MessageType::HevcData, b"next").unwrap());
        let mut parser = FrameParser::new();
        parser.push(&bytes);

        // Act
        let first = parser.next_frame().expect("empty frame");
        let second = parser.next_frame().expect("following frame");

        // Assert
        assert!(first.payload.is_empty());
        assert_eq!(second.payload, &b"next"[..]);
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn test_partial_header_is_not_consumed() {
        let mut parser = FrameParser::new();
        parser.push(&[0x01, 0x00, 0x00]);

        assert!(parser.next_frame().is_none());
        assert_eq!(parser.bytes_needed(), HEADER_SIZE - 3);
        assert!(parser.has_partial_frame());
    }

    #[test]
    fn test_pending_header_survives_until_payload_completes() {
        // Arrange: full header, only half the payload
        let mut parser = FrameParser::new();
        parser.push(&encode_header(1, 4));
        parser.push(&[1, 2]);

        // Act / Assert: header decoded once, two payload bytes still missing
        assert!(parser.next_frame().is_none());
        assert_eq!(parser.bytes_needed(), 2);

        parser.push(&[3, 4]);
        let frame = parser.next_frame().expect("frame completes");
        assert_eq!(frame.payload, vec![1u8, 2, 3, 4]);
        assert_eq!(parser.bytes_needed(), HEADER_SIZE);
    }

    #[test]
    fn test_unknown_type_is_framed_and_stream_stays_in_sync() {
        // Arrange: unlisted type 42 with a 2-byte payload, then a known frame
        let mut bytes = encode_raw_frame(42, &[0xAA, 0xBB]).unwrap();
        bytes.extend_from_slice(&encode_frame(MessageType::HevcData, b"ok").unwrap());
        let mut parser = FrameParser::new();
        parser.push(&bytes);

        // Act
        let frames: Vec<_> = parser.frames().collect();

        // Assert
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].header.message_type, 42);
        assert_eq!(frames[0].message_type(), MessageType::Unknown);
        assert_eq!(frames[0].payload, vec![0xAAu8, 0xBB]);
        assert_eq!(frames[1].payload, &b"ok"[..]);
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let mut parser = FrameParser::new();
        parser.push(&encode_header(1, 10));
        parser.push(&[0; 5]);
        assert!(parser.next_frame().is_none());

        parser.reset();

        assert!(!parser.has_partial_frame());
        assert_eq!(parser.bytes_needed(), HEADER_SIZE);
        parser.push(&encode_frame(MessageType::HevcData, b"fresh").unwrap());
        assert_eq!(parser.next_frame().unwrap().payload, &b"fresh"[..]);
    }

    #[test]
    fn test_split_keeps_unconsumed_bytes() {
        // Arrange: consume one frame, leave a partial second one, then push more
        let first = encode_frame(MessageType::HevcData, &[7; 32]).unwrap();
        let second = encode_frame(MessageType::HevcData, b"tail").unwrap();
        let mut parser = FrameParser::new();
        parser.push(&first);
        parser.push(&second[..3]);
        assert_eq!(parser.next_frame().unwrap().payload, vec![7u8; 32]);

        // Act
        parser.push(&second[3..]);

        // Assert
        assert_eq!(parser.next_frame().unwrap().payload, &b"tail"[..]);
        assert!(!parser.has_partial_frame());
    }

    #[test]
    fn test_payload_shares_the_receive_buffer() {
        // Arrange: two frames delivered in one read
        let mut bytes = encode_frame(MessageType::HevcData, b"first").unwrap();
        bytes.extend_from_slice(&encode_frame(MessageType::HevcData, b"second").unwrap());
        let mut parser = FrameParser::new();
        parser.push(&bytes);

        // Act
        let first = parser.next_frame().unwrap();
        let second = parser.next_frame().unwrap();

        // Assert: both payloads point into the same allocation, back to back
        let first_end = first.payload.as_ptr() as usize + first.payload.len();
        assert_eq!(second.payload.as_ptr() as usize, first_end + HEADER_SIZE);
        assert_eq!(second.payload, &b"second"[..]);
    }
}
