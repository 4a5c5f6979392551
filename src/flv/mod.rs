//! FLV framing
//!
//! An FLV byte stream is a 9-byte file header, a zero PreviousTagSize, then
//! tags back to back. RTMP audio/video/data message payloads are already
//! FLV tag bodies, so muxing is pure framing with no transcoding.
//!
//! ```text
//! Tag: type(1) data_size(3) ts_low(3) ts_ext(1) stream_id(3)=0
//!      payload(N) previous_tag_size(4) = 11 + N
//! ```
//!
//! The 32-bit timestamp is split with bits 0..24 in `ts_low` and bits
//! 24..32 in `ts_ext`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::bus::{MediaMessage, MessageKind};

/// FLV file header length.
pub const HEADER_SIZE: usize = 9;

/// Tag header length (through the 3-byte stream id).
pub const TAG_HEADER_SIZE: usize = 11;

pub const TAG_AUDIO: u8 = 8;
pub const TAG_VIDEO: u8 = 9;
pub const TAG_SCRIPT: u8 = 18;

const FLV_VERSION: u8 = 1;
const FLAG_AUDIO: u8 = 0x04;
const FLAG_VIDEO: u8 = 0x01;

/// The 9-byte file header. `data_offset` is the header length itself; the
/// body's PreviousTagSize0 follows immediately.
pub fn file_header(has_audio: bool, has_video: bool) -> [u8; HEADER_SIZE] {
    let mut flags = 0;
    if has_audio {
        flags |= FLAG_AUDIO;
    }
    if has_video {
        flags |= FLAG_VIDEO;
    }
    let mut header = [0u8; HEADER_SIZE];
    header[0..3].copy_from_slice(b"FLV");
    header[3] = FLV_VERSION;
    header[4] = flags;
    header[5..9].copy_from_slice(&(HEADER_SIZE as u32).to_be_bytes());
    header
}

/// File header plus the four-byte PreviousTagSize0 — the first unit every
/// subscriber receives.
pub fn stream_prologue() -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + 4);
    buf.put_slice(&file_header(true, true));
    buf.put_u32(0);
    buf.freeze()
}

/// Frame a payload as one complete FLV tag including its trailing
/// previous-tag-size.
pub fn encode_tag(tag_type: u8, timestamp: u32, payload: &[u8]) -> Bytes {
    let data_size = payload.len() as u32;
    let mut buf = BytesMut::with_capacity(TAG_HEADER_SIZE + payload.len() + 4);

    buf.put_u8(tag_type);
    buf.put_u8((data_size >> 16) as u8);
    buf.put_u8((data_size >> 8) as u8);
    buf.put_u8(data_size as u8);
    buf.put_u8((timestamp >> 16) as u8);
    buf.put_u8((timestamp >> 8) as u8);
    buf.put_u8(timestamp as u8);
    buf.put_u8((timestamp >> 24) as u8);
    buf.put_slice(&[0, 0, 0]); // stream id, always zero
    buf.put_slice(payload);
    buf.put_u32(TAG_HEADER_SIZE as u32 + data_size);
    buf.freeze()
}

/// FLV tag type for a bus message kind.
pub fn tag_type_for(kind: MessageKind) -> u8 {
    match kind {
        MessageKind::Audio => TAG_AUDIO,
        MessageKind::Video => TAG_VIDEO,
        MessageKind::Metadata => TAG_SCRIPT,
    }
}

/// Frame a bus message as an FLV tag with the given (already rebased)
/// timestamp. The payload is used as-is.
pub fn mux_message(msg: &MediaMessage, timestamp: u32) -> Bytes {
    encode_tag(tag_type_for(msg.kind), timestamp, msg.payload())
}

/// Video payload carries a keyframe: upper nibble of the first byte is 1.
pub fn is_video_keyframe(payload: &[u8]) -> bool {
    payload.first().is_some_and(|b| b >> 4 == 1)
}

/// AVC sequence header: AVC codec id with packet type 0.
pub fn is_avc_sequence_header(payload: &[u8]) -> bool {
    payload.len() >= 2 && payload[0] & 0x0F == 7 && payload[1] == 0
}

/// AAC sequence header: AAC sound format with packet type 0.
pub fn is_aac_sequence_header(payload: &[u8]) -> bool {
    payload.len() >= 2 && payload[0] >> 4 == 10 && payload[1] == 0
}
