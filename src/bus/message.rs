//! Pooled media messages
//!
//! A `MediaMessage` is one unit of media moving through the bus: an audio
//! frame, a video frame, or a metadata/script payload. Payload buffers come
//! from a process-wide pool so the steady-state publish path does not
//! allocate per frame.
//!
//! Ownership: a message is immutable once handed to `Stream::publish`.
//! Subscribers observe it through a shared `Arc`; when the last reference
//! drops, the payload buffer (if still uniquely owned) returns to the pool.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::OnceLock;

/// Reserved capacity of a freshly acquired payload buffer.
pub const PAYLOAD_RESERVE: usize = 64 * 1024;

/// Buffers that grew beyond this capacity are not returned to the pool,
/// which bounds resident memory under occasional oversized frames.
pub const PAYLOAD_POOL_CAP: usize = 256 * 1024;

/// Kind of media carried by a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Audio,
    Video,
    Metadata,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Audio => write!(f, "audio"),
            MessageKind::Video => write!(f, "video"),
            MessageKind::Metadata => write!(f, "metadata"),
        }
    }
}

/// One unit of media flowing through the bus.
#[derive(Debug)]
pub struct MediaMessage {
    /// Kind of media (audio, video, metadata)
    pub kind: MessageKind,
    /// Timestamp in milliseconds as delivered by the publisher; may wrap
    pub timestamp: u32,
    /// Codec sequence header or `onMetaData`; replayed to late joiners
    pub is_init: bool,
    payload: Bytes,
}

impl MediaMessage {
    /// Build a message whose payload is a copy of `src` in a pooled buffer.
    /// The caller keeps ownership of `src`; the message never aliases it.
    pub fn copy_from(kind: MessageKind, timestamp: u32, is_init: bool, src: &[u8]) -> Self {
        let mut buf = payload_pool().acquire();
        buf.extend_from_slice(src);
        Self {
            kind,
            timestamp,
            is_init,
            payload: buf.freeze(),
        }
    }

    /// Payload bytes. Immutable for the lifetime of the message.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Deep copy with its own pooled payload. Used only when caching init
    /// messages; the hot path shares messages by reference.
    pub fn deep_clone(&self) -> Self {
        Self::copy_from(self.kind, self.timestamp, self.is_init, &self.payload)
    }
}

impl Drop for MediaMessage {
    fn drop(&mut self) {
        // Reclaim the buffer when nothing else holds the payload.
        let payload = std::mem::take(&mut self.payload);
        if let Ok(buf) = payload.try_into_mut() {
            payload_pool().release(buf);
        }
    }
}

/// Pool of payload buffers shared by every stream in the process.
pub struct PayloadPool {
    free: Mutex<Vec<BytesMut>>,
}

impl PayloadPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Hand out an empty buffer with at least `PAYLOAD_RESERVE` capacity.
    pub fn acquire(&self) -> BytesMut {
        if let Some(buf) = self.free.lock().pop() {
            return buf;
        }
        BytesMut::with_capacity(PAYLOAD_RESERVE)
    }

    /// Return a buffer to the pool. Oversized buffers are dropped instead.
    pub fn release(&self, mut buf: BytesMut) {
        buf.clear();
        if buf.capacity() <= PAYLOAD_POOL_CAP {
            self.free.lock().push(buf);
        }
    }

    /// Number of idle pooled buffers.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

static PAYLOAD_POOL: OnceLock<PayloadPool> = OnceLock::new();

/// The process-wide payload pool.
pub fn payload_pool() -> &'static PayloadPool {
    PAYLOAD_POOL.get_or_init(PayloadPool::new)
}
