//! RTMP chunk stream codec
//!
//! Messages are interleaved on the wire as chunks. Each chunk has a basic
//! header naming `(format, chunk-stream-id)` and a message header whose size
//! depends on the format:
//!
//! ```text
//! fmt 0 (11 bytes): timestamp(3) length(3) type(1) stream_id(4, LE)
//! fmt 1 (7 bytes):  ts_delta(3)  length(3) type(1)
//! fmt 2 (3 bytes):  ts_delta(3)
//! fmt 3 (0 bytes):  continuation, or a new message reusing prior fields
//! ```
//!
//! A 3-byte timestamp field of 0xFFFFFF means the real value follows as a
//! 4-byte extended timestamp. Format-3 chunks carry the extended field too
//! whenever the preceding format 0/1/2 chunk on the same chunk stream used
//! the marker.
//!
//! The message-stream-id in the format-0 header is the single little-endian
//! field in RTMP; everything else is big-endian.
//!
//! Reference: RTMP Specification Section 5.3

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// A complete RTMP message, reassembled from chunks.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub csid: u32,
    pub message_type: u8,
    /// Absolute timestamp in milliseconds
    pub timestamp: u32,
    pub stream_id: u32,
    pub payload: Bytes,
}

/// Per-chunk-stream reassembly state. Lives for the session.
#[derive(Debug, Default)]
struct ChunkStreamState {
    timestamp: u32,
    timestamp_delta: u32,
    message_length: u32,
    message_type: u8,
    stream_id: u32,
    has_extended_ts: bool,
    buffer: BytesMut,
    bytes_read: u32,
}

/// Incremental chunk decoder and message reassembler.
pub struct ChunkDecoder {
    chunk_size: u32,
    streams: HashMap<u32, ChunkStreamState>,
    max_message_size: u32,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Update the incoming chunk size. Called only on receipt of a
    /// Set-Chunk-Size message from the peer.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Drop any partial message on a chunk stream (Abort message).
    pub fn abort(&mut self, csid: u32) {
        if let Some(state) = self.streams.get_mut(&csid) {
            state.buffer.clear();
            state.bytes_read = 0;
        }
    }

    /// Consume one chunk from `buf` if it is fully buffered.
    ///
    /// Returns `Ok(Some(..))` when the chunk completed a message,
    /// `Ok(None)` when more bytes are needed (nothing consumed) or the
    /// chunk was an intermediate piece of a larger message.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawMessage>> {
        let Some((fmt, csid, bh_len)) = parse_basic_header(buf) else {
            return Ok(None);
        };

        let chunk_size = self.chunk_size;
        let max_message_size = self.max_message_size;
        let state = self.streams.entry(csid).or_default();

        let mh_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            _ => 0,
        };
        if buf.len() < bh_len + mh_len {
            return Ok(None);
        }
        let header = &buf[bh_len..bh_len + mh_len];

        // The 3-byte timestamp field, when present, decides whether an
        // extended timestamp follows. For format 3 the predecessor decides.
        let (ts_field, has_ext) = if fmt < 3 {
            let t = read_u24(header);
            (t, t == EXTENDED_TIMESTAMP)
        } else {
            (0, state.has_extended_ts)
        };
        let ext_len = if has_ext { 4 } else { 0 };
        if buf.len() < bh_len + mh_len + ext_len {
            return Ok(None);
        }

        let (message_length, message_type, stream_id) = match fmt {
            0 => (
                read_u24(&header[3..]),
                header[6],
                u32::from_le_bytes([header[7], header[8], header[9], header[10]]),
            ),
            1 => (read_u24(&header[3..]), header[6], state.stream_id),
            _ => (state.message_length, state.message_type, state.stream_id),
        };

        if message_length > max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size: message_length,
                max: max_message_size,
            }
            .into());
        }

        // Formats 0/1/2 always open a new message; format 3 continues one
        // when bytes are pending and otherwise starts a repeat message.
        let carried = if fmt < 3 { 0 } else { state.bytes_read };
        let remaining = message_length.saturating_sub(carried);
        let take = remaining.min(chunk_size) as usize;

        let total_header = bh_len + mh_len + ext_len;
        if buf.len() < total_header + take {
            return Ok(None);
        }

        // Everything is buffered; commit.
        let ext_value = if has_ext {
            read_u32(&buf[bh_len + mh_len..])
        } else {
            0
        };
        buf.advance(total_header);

        match fmt {
            0 => {
                state.timestamp = if has_ext { ext_value } else { ts_field };
                state.timestamp_delta = 0;
                state.message_length = message_length;
                state.message_type = message_type;
                state.stream_id = stream_id;
                state.has_extended_ts = has_ext;
            }
            1 => {
                let delta = if has_ext { ext_value } else { ts_field };
                state.timestamp = state.timestamp.wrapping_add(delta);
                state.timestamp_delta = delta;
                state.message_length = message_length;
                state.message_type = message_type;
                state.has_extended_ts = has_ext;
            }
            2 => {
                let delta = if has_ext { ext_value } else { ts_field };
                state.timestamp = state.timestamp.wrapping_add(delta);
                state.timestamp_delta = delta;
                state.has_extended_ts = has_ext;
            }
            _ => {
                if state.bytes_read == 0 {
                    // New message reusing the previous header: the stored
                    // delta applies exactly once. A continuation chunk
                    // (bytes_read > 0) must not re-apply it; its extended
                    // timestamp bytes, when present, only repeat the value.
                    state.timestamp = state.timestamp.wrapping_add(state.timestamp_delta);
                }
            }
        }

        if fmt < 3 && state.bytes_read > 0 {
            // A fresh header amid reassembly abandons the truncated message.
            state.buffer.clear();
            state.bytes_read = 0;
        }

        if state.bytes_read == 0 {
            state.buffer.reserve(message_length as usize);
        }
        state.buffer.extend_from_slice(&buf[..take]);
        buf.advance(take);
        state.bytes_read += take as u32;

        if state.bytes_read >= state.message_length {
            state.bytes_read = 0;
            Ok(Some(RawMessage {
                csid,
                message_type: state.message_type,
                timestamp: state.timestamp,
                stream_id: state.stream_id,
                payload: state.buffer.split().freeze(),
            }))
        } else {
            Ok(None)
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the 1-3 byte basic header without consuming.
/// Returns `(fmt, csid, header_len)`.
fn parse_basic_header(buf: &[u8]) -> Option<(u8, u32, usize)> {
    let first = *buf.first()?;
    let fmt = first >> 6;
    match first & 0x3F {
        0 => {
            let second = *buf.get(1)?;
            Some((fmt, 64 + u32::from(second), 2))
        }
        1 => {
            if buf.len() < 3 {
                return None;
            }
            Some((fmt, 64 + u32::from(buf[1]) + u32::from(buf[2]) * 256, 3))
        }
        low => Some((fmt, u32::from(low), 1)),
    }
}

fn read_u24(b: &[u8]) -> u32 {
    (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2])
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Chunk encoder. Writes a message as one format-0 chunk followed by
/// format-3 continuations of at most the outgoing chunk size.
pub struct ChunkEncoder {
    chunk_size: u32,
}

impl ChunkEncoder {
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the outgoing chunk size. This is a local decision; the peer
    /// learns about it from the Set-Chunk-Size message we send.
    pub fn set_chunk_size(&mut self, size: u32) {
        self.chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Encode a complete message into `out`.
    pub fn encode(
        &self,
        csid: u32,
        message_type: u8,
        timestamp: u32,
        stream_id: u32,
        payload: &[u8],
        out: &mut BytesMut,
    ) {
        let needs_ext = timestamp >= EXTENDED_TIMESTAMP;
        let ts_field = if needs_ext {
            EXTENDED_TIMESTAMP
        } else {
            timestamp
        };

        write_basic_header(0, csid, out);
        write_u24(ts_field, out);
        write_u24(payload.len() as u32, out);
        out.put_u8(message_type);
        out.put_u32_le(stream_id);
        if needs_ext {
            out.put_u32(timestamp);
        }

        let mut offset = 0;
        let mut first = true;
        loop {
            let take = (payload.len() - offset).min(self.chunk_size as usize);
            if !first {
                write_basic_header(3, csid, out);
                if needs_ext {
                    // The continuation repeats the extended timestamp.
                    out.put_u32(timestamp);
                }
            }
            out.put_slice(&payload[offset..offset + take]);
            offset += take;
            first = false;
            if offset >= payload.len() {
                break;
            }
        }
    }
}

impl Default for ChunkEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_basic_header(fmt: u8, csid: u32, out: &mut BytesMut) {
    if csid >= 320 {
        out.put_u8((fmt << 6) | 1);
        let offset = csid - 64;
        out.put_u8((offset & 0xFF) as u8);
        out.put_u8((offset >> 8) as u8);
    } else if csid >= 64 {
        out.put_u8(fmt << 6);
        out.put_u8((csid - 64) as u8);
    } else {
        out.put_u8((fmt << 6) | csid as u8);
    }
}

fn write_u24(value: u32, out: &mut BytesMut) {
    out.put_u8((value >> 16) as u8);
    out.put_u8((value >> 8) as u8);
    out.put_u8(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(encoder: &ChunkEncoder, csid: u32, ts: u32, sid: u32, payload: &[u8]) -> RawMessage {
        let mut wire = BytesMut::new();
        encoder.encode(csid, MSG_VIDEO, ts, sid, payload, &mut wire);
        let mut decoder = ChunkDecoder::new();
        let msg = decoder.decode(&mut wire).unwrap().expect("complete message");
        assert!(wire.is_empty());
        msg
    }

    #[test]
    fn test_roundtrip_single_chunk() {
        let encoder = ChunkEncoder::new();
        let msg = roundtrip(&encoder, CSID_COMMAND, 1000, 1, b"test payload");
        assert_eq!(msg.csid, CSID_COMMAND);
        assert_eq!(msg.timestamp, 1000);
        assert_eq!(msg.message_type, MSG_VIDEO);
        assert_eq!(msg.stream_id, 1);
        assert_eq!(&msg.payload[..], b"test payload");
    }

    #[test]
    fn test_roundtrip_multi_chunk() {
        // 500 bytes at chunk size 128 is a format 0 chunk plus three
        // format 3 continuations.
        let payload: Vec<u8> = (0..500u32).map(|i| i as u8).collect();
        let encoder = ChunkEncoder::new();

        let mut wire = BytesMut::new();
        encoder.encode(6, MSG_VIDEO, 40, 1, &payload, &mut wire);
        assert_eq!(wire.len(), 1 + 11 + 500 + 3);

        let mut decoder = ChunkDecoder::new();
        // First three decodes consume intermediate chunks.
        assert!(decoder.decode(&mut wire).unwrap().is_none());
        assert!(decoder.decode(&mut wire).unwrap().is_none());
        assert!(decoder.decode(&mut wire).unwrap().is_none());
        let msg = decoder.decode(&mut wire).unwrap().expect("complete");
        assert_eq!(&msg.payload[..], &payload[..]);
        assert_eq!(msg.timestamp, 40);
    }

    #[test]
    fn test_roundtrip_large_outgoing_chunk_size() {
        let mut encoder = ChunkEncoder::new();
        encoder.set_chunk_size(4096);
        let payload = vec![0xAB; 3000];

        let mut wire = BytesMut::new();
        encoder.encode(6, MSG_VIDEO, 0, 1, &payload, &mut wire);
        // Single chunk; no continuation headers.
        assert_eq!(wire.len(), 1 + 11 + 3000);

        let mut decoder = ChunkDecoder::new();
        decoder.set_chunk_size(4096);
        let msg = decoder.decode(&mut wire).unwrap().expect("complete");
        assert_eq!(msg.payload.len(), 3000);
    }

    #[test]
    fn test_extended_timestamp_roundtrip() {
        let ts = 0x0100_0000;
        let payload = vec![1u8; 200]; // forces one continuation at size 128
        let encoder = ChunkEncoder::new();

        let mut wire = BytesMut::new();
        encoder.encode(4, MSG_AUDIO, ts, 1, &payload, &mut wire);

        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut wire).unwrap().is_none());
        let msg = decoder.decode(&mut wire).unwrap().expect("complete");
        assert_eq!(msg.timestamp, ts);
        assert_eq!(msg.payload.len(), 200);
        assert!(wire.is_empty());
    }

    #[test]
    fn test_timestamp_at_marker_boundary() {
        let encoder = ChunkEncoder::new();
        let msg = roundtrip(&encoder, 4, EXTENDED_TIMESTAMP, 1, &[0u8; 4]);
        assert_eq!(msg.timestamp, EXTENDED_TIMESTAMP);
    }

    #[test]
    fn test_format1_applies_delta() {
        let mut wire = BytesMut::new();
        // fmt 0, csid 3, ts 1000, len 2, type 9, sid 1
        wire.put_u8(0x03);
        write_u24(1000, &mut wire);
        write_u24(2, &mut wire);
        wire.put_u8(MSG_VIDEO);
        wire.put_u32_le(1);
        wire.put_slice(&[0xAA, 0xBB]);
        // fmt 1, delta 40, len 2, type 9
        wire.put_u8(0x43);
        write_u24(40, &mut wire);
        write_u24(2, &mut wire);
        wire.put_u8(MSG_VIDEO);
        wire.put_slice(&[0xCC, 0xDD]);
        // fmt 3, new message: stored delta applies once more
        wire.put_u8(0xC3);
        wire.put_slice(&[0xEE, 0xFF]);

        let mut decoder = ChunkDecoder::new();
        let first = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(first.timestamp, 1000);
        let second = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(second.timestamp, 1040);
        assert_eq!(second.stream_id, 1);
        let third = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(third.timestamp, 1080);
        assert_eq!(&third.payload[..], &[0xEE, 0xFF]);
    }

    #[test]
    fn test_format2_delta_reuses_length_and_type() {
        let mut wire = BytesMut::new();
        // fmt 0: ts 100, len 3, type 8, sid 1
        wire.put_u8(0x04);
        write_u24(100, &mut wire);
        write_u24(3, &mut wire);
        wire.put_u8(MSG_AUDIO);
        wire.put_u32_le(1);
        wire.put_slice(&[1, 2, 3]);
        // fmt 2: delta 23 only
        wire.put_u8(0x84);
        write_u24(23, &mut wire);
        wire.put_slice(&[4, 5, 6]);

        let mut decoder = ChunkDecoder::new();
        let first = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(first.timestamp, 100);
        let second = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(second.timestamp, 123);
        assert_eq!(second.message_type, MSG_AUDIO);
        assert_eq!(second.stream_id, 1);
        assert_eq!(&second.payload[..], &[4, 5, 6]);
    }

    #[test]
    fn test_format3_continuation_does_not_reapply_delta() {
        // A two-chunk message: the continuation must keep the timestamp of
        // the message start.
        let payload = vec![7u8; 200];
        let mut wire = BytesMut::new();
        // fmt 0 header
        wire.put_u8(0x04);
        write_u24(500, &mut wire);
        write_u24(200, &mut wire);
        wire.put_u8(MSG_AUDIO);
        wire.put_u32_le(1);
        wire.put_slice(&payload[..128]);
        // fmt 3 continuation
        wire.put_u8(0xC4);
        wire.put_slice(&payload[128..]);

        let mut decoder = ChunkDecoder::new();
        assert!(decoder.decode(&mut wire).unwrap().is_none());
        let msg = decoder.decode(&mut wire).unwrap().unwrap();
        assert_eq!(msg.timestamp, 500);
        assert_eq!(msg.payload.len(), 200);
    }

    #[test]
    fn test_two_byte_basic_header() {
        let encoder = ChunkEncoder::new();
        let msg = roundtrip(&encoder, 70, 0, 1, &[1, 2, 3]);
        assert_eq!(msg.csid, 70);
    }

    #[test]
    fn test_three_byte_basic_header() {
        let encoder = ChunkEncoder::new();
        let msg = roundtrip(&encoder, 400, 0, 1, &[1, 2, 3]);
        assert_eq!(msg.csid, 400);
    }

    #[test]
    fn test_partial_input_consumes_nothing() {
        let encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(3, MSG_COMMAND_AMF0, 0, 0, &[9u8; 50], &mut wire);

        let mut decoder = ChunkDecoder::new();
        // Feed one byte short of the full chunk.
        let full = wire.len();
        let mut partial = BytesMut::from(&wire[..full - 1]);
        assert!(decoder.decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), full - 1);

        // Completing the buffer yields the message.
        partial.put_u8(wire[full - 1]);
        let msg = decoder.decode(&mut partial).unwrap().unwrap();
        assert_eq!(msg.payload.len(), 50);
    }

    #[test]
    fn test_message_too_large_rejected() {
        let mut decoder = ChunkDecoder {
            chunk_size: DEFAULT_CHUNK_SIZE,
            streams: HashMap::new(),
            max_message_size: 64,
        };
        let mut wire = BytesMut::new();
        wire.put_u8(0x03);
        write_u24(0, &mut wire);
        write_u24(65, &mut wire);
        wire.put_u8(MSG_VIDEO);
        wire.put_u32_le(0);
        assert!(decoder.decode(&mut wire).is_err());
    }

    #[test]
    fn test_abort_discards_partial_message() {
        let payload = vec![1u8; 200];
        let encoder = ChunkEncoder::new();
        let mut wire = BytesMut::new();
        encoder.encode(4, MSG_AUDIO, 0, 1, &payload, &mut wire);

        let mut decoder = ChunkDecoder::new();
        // Consume only the first chunk, then abort.
        assert!(decoder.decode(&mut wire).unwrap().is_none());
        decoder.abort(4);

        // A new complete message decodes cleanly afterwards.
        let mut wire2 = BytesMut::new();
        encoder.encode(4, MSG_AUDIO, 10, 1, &[5, 6], &mut wire2);
        let msg = decoder.decode(&mut wire2).unwrap().unwrap();
        assert_eq!(&msg.payload[..], &[5, 6]);
    }
}
