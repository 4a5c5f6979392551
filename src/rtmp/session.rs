//! RTMP session state, acknowledgement tracking, and protocol-control
//! message bodies

use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::constants::{ACK_RESET_THRESHOLD, UC_STREAM_BEGIN};

/// Lifecycle of an RTMP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Connected,
    Publishing,
    Closed,
}

/// Tracks bytes received against the announced acknowledgement window.
///
/// The counter is cumulative and resets once it crosses 0xF0000000, matching
/// the reference behavior of incumbent RTMP implementations.
#[derive(Debug, Default)]
pub struct AckTracker {
    window: u32,
    received: u32,
    last_ack: u32,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the window we announced with Window-Ack-Size.
    pub fn set_window(&mut self, window: u32) {
        self.window = window;
    }

    /// Record bytes read from the socket. Returns the cumulative value to
    /// send as an Acknowledgement when the window has filled.
    pub fn record(&mut self, bytes: u32) -> Option<u32> {
        self.received = self.received.wrapping_add(bytes);
        if self.received >= ACK_RESET_THRESHOLD {
            self.received = 0;
            self.last_ack = 0;
        }
        if self.window > 0 && self.received.wrapping_sub(self.last_ack) >= self.window {
            self.last_ack = self.received;
            return Some(self.received);
        }
        None
    }
}

/// Set-Chunk-Size body (type 1).
pub fn set_chunk_size_body(size: u32) -> Bytes {
    Bytes::copy_from_slice(&size.to_be_bytes())
}

/// Window-Acknowledgement-Size body (type 5).
pub fn window_ack_size_body(size: u32) -> Bytes {
    Bytes::copy_from_slice(&size.to_be_bytes())
}

/// Set-Peer-Bandwidth body (type 6).
pub fn set_peer_bandwidth_body(size: u32, limit_type: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u32(size);
    buf.put_u8(limit_type);
    buf.freeze()
}

/// Stream-Begin user-control body (type 4, event 0).
pub fn stream_begin_body(stream_id: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u16(UC_STREAM_BEGIN);
    buf.put_u32(stream_id);
    buf.freeze()
}

/// Acknowledgement body (type 3): cumulative bytes received.
pub fn acknowledgement_body(sequence: u32) -> Bytes {
    Bytes::copy_from_slice(&sequence.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_bodies() {
        assert_eq!(&set_chunk_size_body(4096)[..], &[0, 0, 0x10, 0]);
        assert_eq!(&window_ack_size_body(5_000_000)[..], &5_000_000u32.to_be_bytes());
        let bw = set_peer_bandwidth_body(5_000_000, 2);
        assert_eq!(&bw[..4], &5_000_000u32.to_be_bytes());
        assert_eq!(bw[4], 2);
        assert_eq!(&stream_begin_body(1)[..], &[0, 0, 0, 0, 0, 1]);
        assert_eq!(&acknowledgement_body(0xABCD)[..], &[0, 0, 0xAB, 0xCD]);
    }

    #[test]
    fn test_no_ack_before_window_set() {
        let mut ack = AckTracker::new();
        assert_eq!(ack.record(1_000_000), None);
    }

    #[test]
    fn test_ack_at_window() {
        let mut ack = AckTracker::new();
        ack.set_window(1000);
        assert_eq!(ack.record(400), None);
        assert_eq!(ack.record(400), None);
        // Crosses the window: cumulative 1200.
        assert_eq!(ack.record(400), Some(1200));
        // Counter continues from the last ack.
        assert_eq!(ack.record(999), None);
        assert_eq!(ack.record(1), Some(2200));
    }

    #[test]
    fn test_counter_reset_at_threshold() {
        let mut ack = AckTracker::new();
        ack.set_window(u32::MAX);
        ack.received = ACK_RESET_THRESHOLD - 1;
        ack.last_ack = ACK_RESET_THRESHOLD - 1;
        assert_eq!(ack.record(1), None);
        assert_eq!(ack.received, 0);
        assert_eq!(ack.last_ack, 0);
    }
}
