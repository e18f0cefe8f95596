//! # thermo-core
//!
//! Shared library for the simulated network thermometer containing the wire
//! protocol messages and the text frame codec.
//!
//! It has no dependencies on sockets, async runtimes, or the device simulator,
//! so a collector implementation (or a test acting as one) can use it as-is.
//!
//! # Protocol overview (for beginners)
//!
//! The device and the collector exchange short text *facts* over one TCP
//! connection.  Each fact is a key, a colon, a value, and a `;` terminator:
//!
//! ```text
//! Device: Thermometer;Update interval: 1;Temperature: 0.42;
//! ```
//!
//! - **`protocol::messages`** – the closed set of keys and commands, decoded
//!   into the [`Message`] enum so callers can `match` on them.
//! - **`protocol::codec`** – turns facts into bytes and splits an incoming
//!   byte stream back into frames, keeping partial frames between reads.

pub mod protocol;

pub use protocol::codec::{FrameBuffer, FrameCodec, ProtocolError, WireEncoding};
pub use protocol::messages::{Message, MessageKey, Method};
