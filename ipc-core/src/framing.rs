//! Length-prefixed framing (spec §4.1). Wire layout: `u32` big-endian length
//! (covering only the payload) followed by that many payload bytes.
//!
//! This module only knows about raw byte frames; it never deserialises a
//! payload. That's deliberate — `split_stream` must be able to peel frames
//! off a byte buffer without caring whether the payload inside happens to be
//! valid for whatever codec is configured, so a single malformed frame can be
//! reported without losing track of where the next frame starts.

use bytes::{Buf, BufMut, BytesMut};

const LENGTH_PREFIX_SIZE: usize = 4;

/// Prepends a 4-byte big-endian length prefix to `payload` and returns the
/// whole frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.put_u32(payload.len() as u32);
    out.extend_from_slice(payload);
    out
}

/// Peels as many complete frames as possible off the front of `buffer`,
/// returning the payload bytes of each frame in arrival order and leaving any
/// incomplete trailing frame untouched in `buffer`.
///
/// Edge-case policy (spec §4.1): if fewer than 4 bytes remain, or fewer than
/// `4 + length` bytes remain, stop and carry the tail unchanged — a frame
/// whose declared length would require more bytes than currently present is
/// never partially decoded. A declared length of zero is legal and yields an
/// empty payload.
pub fn split_stream(buffer: &mut BytesMut) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    loop {
        if buffer.len() < LENGTH_PREFIX_SIZE {
            break;
        }
        let length = u32::from_be_bytes(buffer[..LENGTH_PREFIX_SIZE].try_into().unwrap()) as usize;
        if buffer.len() < LENGTH_PREFIX_SIZE + length {
            break;
        }
        buffer.advance(LENGTH_PREFIX_SIZE);
        let payload = buffer.split_to(length);
        frames.push(payload.to_vec());
    }
    frames
}
