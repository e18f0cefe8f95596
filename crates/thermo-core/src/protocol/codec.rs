//! Text codec for the thermometer protocol.
//!
//! Wire format:
//! ```text
//! <Key>: <Value>;<Key>: <Value>;...
//! ```
//! Frames are concatenated back to back with no length prefix.  The `;`
//! delimiter is not escaped, so [`FrameCodec::encode`] refuses any key or value
//! that contains it.
//!
//! # Text encodings
//!
//! The desktop collector these devices pair with speaks UTF-16LE, so that is
//! the default.  UTF-8 is available for simpler peers (`nc`, test scripts).
//! Delimiter detection always happens on whole code units: in UTF-16LE a `;`
//! is the two-byte unit `3B 00` at an even offset, and an odd byte left over at
//! the end of a read stays in the buffer until its partner arrives.
//!
//! # Streaming (for beginners)
//!
//! TCP is a byte stream.  One `read()` may return half a frame, exactly one
//! frame, or a dozen frames.  [`FrameCodec::decode`] therefore returns the
//! complete frames it found *and* the unterminated tail, and [`FrameBuffer`]
//! keeps that tail around so it can be prefixed onto the next read.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::protocol::messages::{Message, MessageKey, DELIMITER, KEY_SEPARATOR};

/// Errors produced while encoding or interpreting frames.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// The frame has no `:` separating key and value.
    #[error("frame has no key separator: {0:?}")]
    MissingSeparator(String),

    /// The key is not part of the protocol vocabulary.
    #[error("unknown key: {0:?}")]
    UnknownKey(String),

    /// The value could not be parsed for the given key.
    #[error("malformed value for {key}: {value:?}")]
    MalformedField { key: MessageKey, value: String },

    /// A `Method` fact named a command the device does not know.
    #[error("unknown method: {0:?}")]
    UnknownMethod(String),

    /// The text to encode contains the frame delimiter.
    #[error("{0:?} contains the frame delimiter")]
    DelimiterInText(String),
}

// ── Encodings ─────────────────────────────────────────────────────────────────

/// Character encoding used for frames on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireEncoding {
    /// Little-endian UTF-16, two bytes per code unit.
    #[default]
    Utf16Le,
    /// UTF-8.
    Utf8,
}

impl WireEncoding {
    fn unit_len(self) -> usize {
        match self {
            WireEncoding::Utf16Le => 2,
            WireEncoding::Utf8 => 1,
        }
    }

    fn is_delimiter(self, unit: &[u8]) -> bool {
        match self {
            WireEncoding::Utf16Le => unit == [DELIMITER as u8, 0x00],
            WireEncoding::Utf8 => unit == [DELIMITER as u8],
        }
    }

    fn encode_text(self, text: &str, out: &mut Vec<u8>) {
        match self {
            WireEncoding::Utf16Le => {
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
            WireEncoding::Utf8 => out.extend_from_slice(text.as_bytes()),
        }
    }

    /// Invalid sequences are replaced with U+FFFD; the frame then fails to
    /// parse and is logged by the dispatcher like any other unknown input.
    fn decode_text(self, bytes: &[u8]) -> String {
        match self {
            WireEncoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                String::from_utf16_lossy(&units)
            }
            WireEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Result of one decode pass over a byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<'a> {
    /// Complete frames in arrival order, each still ending with the delimiter.
    pub frames: Vec<String>,
    /// Bytes after the last delimiter; prefix them onto the next read.
    pub leftover: &'a [u8],
}

/// Encodes facts into frames and splits byte buffers back into frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCodec {
    encoding: WireEncoding,
}

impl FrameCodec {
    /// Creates a codec for the given wire encoding.
    pub fn new(encoding: WireEncoding) -> Self {
        Self { encoding }
    }

    /// Returns the wire encoding used by this codec.
    pub fn encoding(&self) -> WireEncoding {
        self.encoding
    }

    /// Encodes exactly one frame: `key`, the separator, `value`, the delimiter.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DelimiterInText`] if `key` or `value` contains
    /// the delimiter, since the receiver would split the frame in two.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use thermo_core::protocol::{FrameCodec, WireEncoding};
    ///
    /// let codec = FrameCodec::new(WireEncoding::Utf8);
    /// let bytes = codec.encode("Update interval", "5").unwrap();
    /// assert_eq!(bytes, b"Update interval: 5;");
    /// ```
    pub fn encode(&self, key: &str, value: &str) -> Result<Vec<u8>, ProtocolError> {
        for text in [key, value] {
            if text.contains(DELIMITER) {
                return Err(ProtocolError::DelimiterInText(text.to_string()));
            }
        }

        let unit = self.encoding.unit_len();
        let mut buf = Vec::with_capacity((key.len() + KEY_SEPARATOR.len() + value.len() + 1) * unit);
        self.encoding.encode_text(key, &mut buf);
        self.encoding.encode_text(KEY_SEPARATOR, &mut buf);
        self.encoding.encode_text(value, &mut buf);
        self.encoding.encode_text(DELIMITER.encode_utf8(&mut [0u8; 4]), &mut buf);
        Ok(buf)
    }

    /// Encodes a typed [`Message`] as one frame.
    ///
    /// # Errors
    ///
    /// See [`FrameCodec::encode`].
    pub fn encode_message(&self, msg: &Message) -> Result<Vec<u8>, ProtocolError> {
        self.encode(msg.key().label(), &msg.value())
    }

    /// Splits `buffer` into complete frames and an unterminated tail.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use thermo_core::protocol::{FrameCodec, WireEncoding};
    ///
    /// let codec = FrameCodec::new(WireEncoding::Utf8);
    /// let decoded = codec.decode(b"Status: 42;Method: UPD");
    /// assert_eq!(decoded.frames, vec!["Status: 42;".to_string()]);
    /// assert_eq!(decoded.leftover, b"Method: UPD");
    /// ```
    pub fn decode<'a>(&self, buffer: &'a [u8]) -> Decoded<'a> {
        self.decode_from(buffer, 0)
    }

    /// Like [`FrameCodec::decode`], but the delimiter search starts at
    /// `scan_from`.  The caller guarantees `buffer[..scan_from]` holds no
    /// delimiter and that `scan_from` is a multiple of the code unit size.
    fn decode_from<'a>(&self, buffer: &'a [u8], scan_from: usize) -> Decoded<'a> {
        let unit = self.encoding.unit_len();
        let mut frames = Vec::new();
        let mut start = 0;
        let mut pos = scan_from;

        while pos + unit <= buffer.len() {
            let end = pos + unit;
            if self.encoding.is_delimiter(&buffer[pos..end]) {
                frames.push(self.encoding.decode_text(&buffer[start..end]));
                start = end;
            }
            pos = end;
        }

        Decoded {
            frames,
            leftover: &buffer[start..],
        }
    }
}

/// Removes the trailing delimiter (if any) and surrounding whitespace.
pub fn strip_delimiter(frame: &str) -> &str {
    let frame = frame.trim_end();
    frame.strip_suffix(DELIMITER).unwrap_or(frame).trim()
}

// ── Frame buffer ──────────────────────────────────────────────────────────────

/// Accumulates bytes across socket reads for a single connection.
///
/// Only the receive loop owns a `FrameBuffer`, so it needs no lock.
///
/// The aligned prefix of `pending` has already been searched, so each push
/// only scans the bytes it added and a long unterminated run costs linear
/// time overall.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    codec: FrameCodec,
    pending: Vec<u8>,
    /// Length of the delimiter-free, unit-aligned prefix of `pending`.
    scanned: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer that decodes with `codec`.
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            pending: Vec::new(),
            scanned: 0,
        }
    }

    /// Appends a freshly read chunk and returns every frame it completed.
    ///
    /// Bytes after the last delimiter are kept for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let decoded = self.codec.decode_from(&self.pending, self.scanned);
        let frames = decoded.frames;
        let consumed = self.pending.len() - decoded.leftover.len();
        self.pending.drain(..consumed);
        let unit = self.codec.encoding.unit_len();
        self.scanned = self.pending.len() - self.pending.len() % unit;
        if !self.pending.is_empty() {
            trace!(bytes = self.pending.len(), "retaining partial frame");
        }
        frames
    }

    /// Bytes received but not yet terminated by a delimiter.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::Method;

    fn utf8() -> FrameCodec {
        FrameCodec::new(WireEncoding::Utf8)
    }

    fn utf16() -> FrameCodec {
        FrameCodec::new(WireEncoding::Utf16Le)
    }

    // ── encode ────────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_utf8_produces_single_frame() {
        let bytes = utf8().encode("Device", "Thermometer").unwrap();
        assert_eq!(bytes, b"Device: Thermometer;");
    }

    #[test]
    fn test_encode_utf16_uses_two_bytes_per_unit() {
        // Arrange
        let expected: Vec<u8> = "Status: 42;"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();

        // Act
        let bytes = utf16().encode("Status", "42").unwrap();

        // Assert
        assert_eq!(bytes, expected);
        assert_eq!(&bytes[bytes.len() - 2..], &[0x3B, 0x00]);
    }

    #[test]
    fn test_encode_rejects_delimiter_in_value() {
        let result = utf8().encode("Device", "Thermo;meter");
        assert_eq!(
            result,
            Err(ProtocolError::DelimiterInText("Thermo;meter".to_string()))
        );
    }

    #[test]
    fn test_encode_rejects_delimiter_in_key() {
        assert!(utf16().encode("Dev;ice", "x").is_err());
    }

    #[test]
    fn test_encode_message_uses_key_label() {
        let bytes = utf8()
            .encode_message(&Message::Method(Method::Disconnect))
            .unwrap();
        assert_eq!(bytes, b"Method: DISCONNECT;");
    }

    // ── decode ────────────────────────────────────────────────────────────────

    #[test]
    fn test_decode_without_delimiter_is_all_leftover() {
        let decoded = utf8().decode(b"Update inter");
        assert!(decoded.frames.is_empty());
        assert_eq!(decoded.leftover, b"Update inter");
    }

    #[test]
    fn test_decode_trailing_delimiter_leaves_nothing() {
        let decoded = utf8().decode(b"Status: 42;");
        assert_eq!(decoded.frames, vec!["Status: 42;"]);
        assert!(decoded.leftover.is_empty());
    }

    #[test]
    fn test_decode_many_frames_in_arrival_order() {
        let decoded = utf8().decode(b"Method: UPDATE_TEMP;Update interval: 3;Method: REQUEST_STATUS;");
        assert_eq!(
            decoded.frames,
            vec![
                "Method: UPDATE_TEMP;",
                "Update interval: 3;",
                "Method: REQUEST_STATUS;",
            ]
        );
        assert!(decoded.leftover.is_empty());
    }

    #[test]
    fn test_decode_empty_buffer() {
        let decoded = utf16().decode(&[]);
        assert!(decoded.frames.is_empty());
        assert!(decoded.leftover.is_empty());
    }

    #[test]
    fn test_decode_utf16_ignores_misaligned_delimiter_byte() {
        // 'Ȼ' is U+023B: little-endian bytes 3B 02.  The 0x3B byte must not be
        // mistaken for a delimiter.
        let bytes = utf16().encode("Device", "Ȼ").unwrap();
        let decoded = utf16().decode(&bytes);
        assert_eq!(decoded.frames, vec!["Device: Ȼ;"]);
    }

    #[test]
    fn test_decode_utf16_keeps_odd_trailing_byte() {
        let mut bytes = utf16().encode("Status", "42").unwrap();
        bytes.push(b'M');
        let decoded = utf16().decode(&bytes);
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.leftover, &[b'M']);
    }

    #[test]
    fn test_strip_delimiter() {
        assert_eq!(strip_delimiter("Status: 42;"), "Status: 42");
        assert_eq!(strip_delimiter("  Status: 42 ;\r\n"), "Status: 42");
        assert_eq!(strip_delimiter(";"), "");
        assert_eq!(strip_delimiter("no delimiter"), "no delimiter");
    }

    // ── FrameBuffer ───────────────────────────────────────────────────────────

    #[test]
    fn test_frame_buffer_reassembles_split_frame() {
        // Arrange
        let mut buffer = FrameBuffer::new(utf8());

        // Act
        let first = buffer.push(b"Method: UPD");
        let second = buffer.push(b"ATE_TEMP;Sta");

        // Assert
        assert!(first.is_empty());
        assert_eq!(second, vec!["Method: UPDATE_TEMP;"]);
        assert_eq!(buffer.pending(), b"Sta");
    }

    #[test]
    fn test_frame_buffer_utf16_split_inside_code_unit() {
        let bytes = utf16().encode("Update interval", "4").unwrap();
        let mut buffer = FrameBuffer::new(utf16());

        let first = buffer.push(&bytes[..5]);
        let second = buffer.push(&bytes[5..]);

        assert!(first.is_empty());
        assert_eq!(second, vec!["Update interval: 4;"]);
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_frame_buffer_resumes_scan_after_searched_prefix() {
        // Arrange
        let mut buffer = FrameBuffer::new(utf8());
        let run = vec![b'x'; 4096];

        // Act – a long unterminated run delivered in pieces
        for _ in 0..16 {
            assert!(buffer.push(&run).is_empty());
        }
        let before_tail = buffer.scanned;
        let frames = buffer.push(b": 1;");

        // Assert
        assert_eq!(before_tail, 16 * 4096, "whole run searched exactly once");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 16 * 4096 + 4);
        assert_eq!(buffer.scanned, 0);
        assert!(buffer.pending().is_empty());
    }

    #[test]
    fn test_frame_buffer_utf16_scan_offset_stays_unit_aligned() {
        let bytes = utf16().encode("Status", "42").unwrap();
        let mut buffer = FrameBuffer::new(utf16());

        buffer.push(&bytes[..7]);
        assert_eq!(buffer.scanned, 6, "odd trailing byte is not yet searched");

        let frames = buffer.push(&bytes[7..]);
        assert_eq!(frames, vec!["Status: 42;"]);
    }

    #[test]
    fn test_frame_buffer_keeps_scan_offset_of_tail_after_frame() {
        let mut buffer = FrameBuffer::new(utf8());

        let frames = buffer.push(b"Status: 42;Meth");

        assert_eq!(frames, vec!["Status: 42;"]);
        assert_eq!(buffer.scanned, 4);
        assert_eq!(buffer.push(b"od: DISCONNECT;"), vec!["Method: DISCONNECT;"]);
    }
}
