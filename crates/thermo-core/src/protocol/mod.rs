//! Protocol module containing message types and the text frame codec.

pub mod codec;
pub mod messages;

pub use codec::{strip_delimiter, Decoded, FrameBuffer, FrameCodec, ProtocolError, WireEncoding};
pub use messages::*;
