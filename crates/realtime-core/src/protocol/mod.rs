//! Protocol module containing message types, the header codec, and the
//! incremental frame parser.

pub mod codec;
pub mod messages;
pub mod parser;

pub use codec::{
    decode_header, decode_header_from_slice, encode_frame, encode_header, encode_raw_frame,
    ProtocolError,
};
pub use messages::*;
pub use parser::FrameParser;
