//! Canonical payload (de)serialization.
//!
//! The shared block payload has a fixed binary layout: big-endian fields
//! concatenated without padding, in the order
//!
//! ```text
//! up u32 | down u32 | total_up_requester u32 | total_down_requester u32 |
//! sequence_number_requester i32 | previous_hash_requester [20] |
//! total_up_responder u32 | total_down_responder u32 |
//! sequence_number_responder i32 | previous_hash_responder [20]
//! ```
//!
//! The first [`REQUEST_HALF_LEN`] bytes (fields 1–6) are the
//! requester-signable prefix; the responder signs the whole
//! [`PAYLOAD_LEN`] bytes. The same encoding feeds the wire, both
//! signatures, and the SHA-1 content id.

use std::fmt;

use crate::types::{BlockId, HASH_LEN, Payload, RequestHalf, ResponderHalf};

/// Size in bytes of the full canonical payload.
pub const PAYLOAD_LEN: usize = 72;

/// Size in bytes of the requester-signable prefix (fields 1–6).
pub const REQUEST_HALF_LEN: usize = 40;

/// Size in bytes of the responder suffix (fields 7–10).
pub const RESPONDER_HALF_LEN: usize = PAYLOAD_LEN - REQUEST_HALF_LEN;

/// Error raised when a byte buffer cannot be decoded into a payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CodecError {
    /// Buffer too short, too long, or a field out of range.
    MalformedPayload(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MalformedPayload(msg) => write!(f, "malformed payload: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Encodes the requester half into its canonical prefix bytes.
pub fn encode_request_half(half: &RequestHalf) -> [u8; REQUEST_HALF_LEN] {
    let mut buf = [0u8; REQUEST_HALF_LEN];
    let mut w = Writer::new(&mut buf);
    w.put_u32(half.up);
    w.put_u32(half.down);
    w.put_u32(half.total_up);
    w.put_u32(half.total_down);
    w.put_i32(half.sequence_number);
    w.put_hash(&half.previous_hash);
    buf
}

/// Encodes the responder half into its canonical suffix bytes.
pub fn encode_responder_half(half: &ResponderHalf) -> [u8; RESPONDER_HALF_LEN] {
    let mut buf = [0u8; RESPONDER_HALF_LEN];
    let mut w = Writer::new(&mut buf);
    w.put_u32(half.total_up);
    w.put_u32(half.total_down);
    w.put_i32(half.sequence_number);
    w.put_hash(&half.previous_hash);
    buf
}

/// Encodes a full payload into its canonical bytes.
pub fn encode_payload(payload: &Payload) -> [u8; PAYLOAD_LEN] {
    let mut buf = [0u8; PAYLOAD_LEN];
    let requester = encode_request_half(&payload.request_half());
    let responder = encode_responder_half(&ResponderHalf {
        total_up: payload.total_up_responder,
        total_down: payload.total_down_responder,
        sequence_number: payload.sequence_number_responder,
        previous_hash: payload.previous_hash_responder,
    });
    buf[..REQUEST_HALF_LEN].copy_from_slice(&requester);
    buf[REQUEST_HALF_LEN..].copy_from_slice(&responder);
    buf
}

/// Decodes the requester-signable prefix of a signature request.
///
/// Fails with [`CodecError::MalformedPayload`] when the buffer length is
/// wrong or the sequence number is negative.
pub fn decode_request_half(buf: &[u8]) -> Result<RequestHalf, CodecError> {
    if buf.len() != REQUEST_HALF_LEN {
        return Err(CodecError::MalformedPayload("request half length"));
    }
    let mut r = Reader::new(buf);
    let half = RequestHalf {
        up: r.take_u32(),
        down: r.take_u32(),
        total_up: r.take_u32(),
        total_down: r.take_u32(),
        sequence_number: r.take_i32(),
        previous_hash: r.take_hash(),
    };
    if half.sequence_number < 0 {
        return Err(CodecError::MalformedPayload("negative sequence number"));
    }
    Ok(half)
}

/// Decodes a full canonical payload.
///
/// Fails with [`CodecError::MalformedPayload`] when the buffer length is
/// wrong or a sequence number is negative.
pub fn decode_payload(buf: &[u8]) -> Result<Payload, CodecError> {
    if buf.len() != PAYLOAD_LEN {
        return Err(CodecError::MalformedPayload("payload length"));
    }
    let mut r = Reader::new(buf);
    let payload = Payload {
        up: r.take_u32(),
        down: r.take_u32(),
        total_up_requester: r.take_u32(),
        total_down_requester: r.take_u32(),
        sequence_number_requester: r.take_i32(),
        previous_hash_requester: r.take_hash(),
        total_up_responder: r.take_u32(),
        total_down_responder: r.take_u32(),
        sequence_number_responder: r.take_i32(),
        previous_hash_responder: r.take_hash(),
    };
    if payload.sequence_number_requester < 0 || payload.sequence_number_responder < 0 {
        return Err(CodecError::MalformedPayload("negative sequence number"));
    }
    Ok(payload)
}

/// Splits encoded payload bytes into (requester-signable prefix, whole).
///
/// The transport authenticator treats the first part as the requester's
/// signed region and the second as the responder's.
pub fn split_signable(payload: &[u8]) -> (&[u8], &[u8]) {
    let prefix_len = REQUEST_HALF_LEN.min(payload.len());
    (&payload[..prefix_len], payload)
}

/// Cursor writing fixed-width big-endian fields into a buffer.
struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Writer { buf, pos: 0 }
    }

    fn put_u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_be_bytes());
        self.pos += 4;
    }

    fn put_i32(&mut self, v: i32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_be_bytes());
        self.pos += 4;
    }

    fn put_hash(&mut self, id: &BlockId) {
        self.buf[self.pos..self.pos + HASH_LEN].copy_from_slice(id.as_bytes());
        self.pos += HASH_LEN;
    }
}

/// Cursor reading fixed-width big-endian fields from a length-checked
/// buffer. Callers verify the total length up front.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take_u32(&mut self) -> u32 {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        u32::from_be_bytes(arr)
    }

    fn take_i32(&mut self) -> i32 {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        i32::from_be_bytes(arr)
    }

    fn take_hash(&mut self) -> BlockId {
        let mut arr = [0u8; HASH_LEN];
        arr.copy_from_slice(&self.buf[self.pos..self.pos + HASH_LEN]);
        self.pos += HASH_LEN;
        BlockId(arr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_payload() -> Payload {
        Payload {
            up: 0x0102_0304,
            down: 7,
            total_up_requester: 1_000,
            total_down_requester: 2_000,
            sequence_number_requester: 5,
            previous_hash_requester: BlockId([0xAA; HASH_LEN]),
            total_up_responder: 3_000,
            total_down_responder: 4_000,
            sequence_number_responder: 9,
            previous_hash_responder: BlockId([0xBB; HASH_LEN]),
        }
    }

    #[test]
    fn payload_round_trips_and_is_72_bytes() {
        let payload = dummy_payload();
        let bytes = encode_payload(&payload);
        assert_eq!(bytes.len(), PAYLOAD_LEN);

        let decoded = decode_payload(&bytes).expect("decode");
        assert_eq!(decoded, payload);
    }

    #[test]
    fn request_half_round_trips_and_is_prefix_of_payload() {
        let payload = dummy_payload();
        let half = payload.request_half();

        let half_bytes = encode_request_half(&half);
        assert_eq!(half_bytes.len(), REQUEST_HALF_LEN);
        assert_eq!(decode_request_half(&half_bytes).expect("decode"), half);

        let payload_bytes = encode_payload(&payload);
        assert_eq!(&payload_bytes[..REQUEST_HALF_LEN], half_bytes.as_slice());
    }

    #[test]
    fn fields_are_big_endian_in_declared_order() {
        let bytes = encode_payload(&dummy_payload());
        // up = 0x01020304 occupies the first four bytes, network order.
        assert_eq!(&bytes[..4], &[0x01, 0x02, 0x03, 0x04]);
        // down = 7 follows.
        assert_eq!(&bytes[4..8], &[0, 0, 0, 7]);
        // requester predecessor hash sits at the end of the prefix.
        assert_eq!(&bytes[20..40], &[0xAA; HASH_LEN]);
        // responder predecessor hash closes the payload.
        assert_eq!(&bytes[52..72], &[0xBB; HASH_LEN]);
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let bytes = encode_payload(&dummy_payload());
        let err = decode_payload(&bytes[..PAYLOAD_LEN - 1]).unwrap_err();
        assert_eq!(err, CodecError::MalformedPayload("payload length"));
    }

    #[test]
    fn negative_sequence_number_is_malformed() {
        let mut payload = dummy_payload();
        payload.sequence_number_responder = -1;
        let bytes = encode_payload(&payload);
        assert!(decode_payload(&bytes).is_err());

        let mut half = dummy_payload().request_half();
        half.sequence_number = -3;
        let bytes = encode_request_half(&half);
        assert!(decode_request_half(&bytes).is_err());
    }

    #[test]
    fn split_signable_returns_prefix_and_whole() {
        let bytes = encode_payload(&dummy_payload());
        let (prefix, whole) = split_signable(&bytes);
        assert_eq!(prefix.len(), REQUEST_HALF_LEN);
        assert_eq!(whole.len(), PAYLOAD_LEN);
        assert_eq!(prefix, &whole[..REQUEST_HALF_LEN]);
    }
}
