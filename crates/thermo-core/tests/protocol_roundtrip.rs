//! Integration tests for the thermo-core frame codec.
//!
//! These tests drive the codec through its public API the way a connection's
//! receive loop does: encode a sequence of facts, concatenate the bytes, and
//! feed them back in one piece or in arbitrary chunks.

use thermo_core::{
    protocol::{
        messages::{DEVICE_STATUS_UP, DEVICE_TYPE},
        strip_delimiter,
    },
    FrameBuffer, FrameCodec, Message, Method, WireEncoding,
};

fn sample_messages() -> Vec<Message> {
    vec![
        Message::Device(DEVICE_TYPE.to_string()),
        Message::UpdateInterval(1),
        Message::Temperature(0.37),
        Message::Temperature(-12.5),
        Message::Status(DEVICE_STATUS_UP),
        Message::Method(Method::UpdateTemp),
        Message::Method(Method::RequestStatus),
        Message::Method(Method::Disconnect),
    ]
}

fn encode_all(codec: &FrameCodec, messages: &[Message]) -> Vec<u8> {
    messages
        .iter()
        .flat_map(|m| codec.encode_message(m).expect("encode must succeed"))
        .collect()
}

fn parse_all(frames: &[String]) -> Vec<Message> {
    frames
        .iter()
        .map(|f| Message::parse(strip_delimiter(f)).expect("frame must parse"))
        .collect()
}

#[test]
fn test_decode_whole_stream_yields_every_frame_in_order() {
    for encoding in [WireEncoding::Utf8, WireEncoding::Utf16Le] {
        // Arrange
        let codec = FrameCodec::new(encoding);
        let messages = sample_messages();
        let bytes = encode_all(&codec, &messages);

        // Act
        let decoded = codec.decode(&bytes);

        // Assert
        assert_eq!(decoded.frames.len(), messages.len());
        assert!(decoded.leftover.is_empty(), "{encoding:?}: leftover must be empty");
        assert_eq!(parse_all(&decoded.frames), messages);
    }
}

#[test]
fn test_decode_is_invariant_to_chunk_boundary() {
    for encoding in [WireEncoding::Utf8, WireEncoding::Utf16Le] {
        let codec = FrameCodec::new(encoding);
        let bytes = encode_all(&codec, &sample_messages());
        let whole = codec.decode(&bytes).frames;

        for split in 0..=bytes.len() {
            let mut buffer = FrameBuffer::new(codec);
            let mut frames = buffer.push(&bytes[..split]);
            frames.extend(buffer.push(&bytes[split..]));

            assert_eq!(frames, whole, "{encoding:?}: split at byte {split}");
            assert!(buffer.pending().is_empty());
        }
    }
}

#[test]
fn test_byte_at_a_time_delivery_reassembles_frames() {
    let codec = FrameCodec::new(WireEncoding::Utf16Le);
    let messages = sample_messages();
    let bytes = encode_all(&codec, &messages);
    let mut buffer = FrameBuffer::new(codec);

    let frames: Vec<String> = bytes.iter().flat_map(|b| buffer.push(&[*b])).collect();

    assert_eq!(parse_all(&frames), messages);
}

#[test]
fn test_frames_keep_their_delimiter() {
    let codec = FrameCodec::new(WireEncoding::Utf8);
    let decoded = codec.decode(b"Status: 42;");
    assert!(decoded.frames[0].ends_with(';'));
}

#[test]
fn test_leftover_is_prefixed_onto_next_read() {
    let codec = FrameCodec::new(WireEncoding::Utf8);
    let mut buffer = FrameBuffer::new(codec);

    assert_eq!(buffer.push(b"Update interval: 1;Upd"), vec!["Update interval: 1;"]);
    assert_eq!(buffer.pending(), b"Upd");
    assert_eq!(buffer.push(b"ate interval: 2;"), vec!["Update interval: 2;"]);
    assert!(buffer.pending().is_empty());
}
