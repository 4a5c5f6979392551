//! FLV subscriber runtime
//!
//! Drains one subscriber's ring queue into framed FLV tags. Two policies run
//! per subscriber, independent of every other subscriber:
//!
//! - **Keyframe gate.** Until a video keyframe is seen, every non-init
//!   message is dropped. A subscriber joining mid-GOP cannot form a valid
//!   reference frame; without the gate, audio piles up against undecodable
//!   video.
//! - **Timestamp rebase.** Init tags go out at t=0. The first post-gate live
//!   message defines the offset and every later timestamp subtracts it, so
//!   players do not buffer the gap between init and the live edge.
//!
//! The transports own delivery: HTTP-FLV writes the returned tags into a
//! streamed response body, WebSocket-FLV sends each as one binary frame.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::bus::{MediaMessage, MessageKind, Registry, RingQueue, Stream, Subscriber};
use crate::flv;

/// Ring capacity for FLV subscribers.
pub const SUBSCRIBER_QUEUE_CAPACITY: u32 = 1000;

/// Sleep between polls of an empty queue. The reader must yield to the
/// scheduler rather than busy-wait.
const IDLE_POLL: Duration = Duration::from_millis(2);

/// Per-subscriber tag producer: gate, rebase, mux.
pub struct FlvEgress {
    queue: Arc<RingQueue>,
    gate_open: bool,
    ts_offset: Option<u32>,
}

impl FlvEgress {
    pub fn new(queue: Arc<RingQueue>) -> Self {
        Self {
            queue,
            gate_open: false,
            ts_offset: None,
        }
    }

    /// The first output unit: FLV file header plus PreviousTagSize0.
    pub fn prologue() -> Bytes {
        flv::stream_prologue()
    }

    /// Pull queued messages until one passes the gate; frame it as a tag.
    /// Returns None once the queue is momentarily empty.
    pub fn next_ready(&mut self) -> Option<Bytes> {
        loop {
            let msg = self.queue.read()?;
            if let Some(timestamp) = self.admit(&msg) {
                return Some(flv::mux_message(&msg, timestamp));
            }
        }
    }

    /// Await the next deliverable tag, yielding while the queue is empty.
    pub async fn next_tag(&mut self) -> Bytes {
        loop {
            if let Some(tag) = self.next_ready() {
                return tag;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Gate and rebase. Returns the tag timestamp for a deliverable message,
    /// None for one the gate drops.
    fn admit(&mut self, msg: &MediaMessage) -> Option<u32> {
        if msg.is_init {
            return Some(0);
        }

        if !self.gate_open {
            if msg.kind == MessageKind::Video && flv::is_video_keyframe(msg.payload()) {
                self.gate_open = true;
            } else {
                return None;
            }
        }

        Some(match self.ts_offset {
            Some(offset) => msg.timestamp.saturating_sub(offset),
            None => {
                self.ts_offset = Some(msg.timestamp);
                0
            }
        })
    }

    /// Messages dropped by the ring under backpressure.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

/// Ties a subscriber's lifetime to its transport: detaches from the stream
/// on drop and removes the stream from the registry once it is idle.
pub struct SubscriberGuard {
    stream: Arc<Stream>,
    registry: Arc<Registry>,
    id: u64,
}

impl SubscriberGuard {
    /// Attach a new FLV subscriber to `stream` with the standard queue
    /// capacity and drop-oldest backpressure.
    pub fn attach(stream: Arc<Stream>, registry: Arc<Registry>) -> (Self, FlvEgress) {
        let subscriber: Subscriber = stream.attach_subscriber(
            SUBSCRIBER_QUEUE_CAPACITY,
            crate::bus::BackpressureStrategy::DropOldest,
        );
        let egress = FlvEgress::new(Arc::clone(subscriber.queue()));
        let guard = Self {
            stream,
            registry,
            id: subscriber.id(),
        };
        (guard, egress)
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.stream.detach_subscriber(self.id);
        self.registry.remove_if_empty(self.stream.key());
        tracing::debug!(
            stream = %self.stream.key(),
            subscriber_id = self.id,
            "subscriber detached"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BackpressureStrategy, StreamKey};

    fn queue_with(messages: Vec<MediaMessage>) -> Arc<RingQueue> {
        let queue = Arc::new(RingQueue::new(64, BackpressureStrategy::DropOldest));
        for msg in messages {
            queue.write(Arc::new(msg));
        }
        queue
    }

    fn video(ts: u32, payload: &[u8]) -> MediaMessage {
        MediaMessage::copy_from(MessageKind::Video, ts, false, payload)
    }

    fn audio(ts: u32, payload: &[u8]) -> MediaMessage {
        MediaMessage::copy_from(MessageKind::Audio, ts, false, payload)
    }

    fn init(kind: MessageKind, payload: &[u8]) -> MediaMessage {
        MediaMessage::copy_from(kind, 0, true, payload)
    }

    fn tag_timestamp(tag: &[u8]) -> u32 {
        (u32::from(tag[4]) << 16)
            | (u32::from(tag[5]) << 8)
            | u32::from(tag[6])
            | (u32::from(tag[7]) << 24)
    }

    #[test]
    fn test_gate_holds_until_keyframe() {
        let queue = queue_with(vec![
            audio(0, &[0xAF, 0x01]),        // pre-keyframe audio: dropped
            video(10, &[0x27, 0x01]),       // inter frame: dropped
            video(20, &[0x17, 0x01, 0xAA]), // keyframe: opens the gate
            audio(30, &[0xAF, 0x01, 0xBB]),
        ]);
        let mut egress = FlvEgress::new(queue);

        let first = egress.next_ready().expect("keyframe emitted");
        assert_eq!(first[0], flv::TAG_VIDEO);
        // First non-init tag is the keyframe at t=0.
        assert_eq!(first[11] >> 4, 1);
        assert_eq!(tag_timestamp(&first), 0);

        let second = egress.next_ready().expect("audio after gate");
        assert_eq!(second[0], flv::TAG_AUDIO);
        assert_eq!(tag_timestamp(&second), 10); // 30 - 20

        assert!(egress.next_ready().is_none());
    }

    #[test]
    fn test_init_passes_gate_at_time_zero() {
        let queue = queue_with(vec![
            init(MessageKind::Metadata, b"onMetaData"),
            init(MessageKind::Video, &[0x17, 0x00]),
            init(MessageKind::Audio, &[0xAF, 0x00]),
            video(5000, &[0x17, 0x01]),
        ]);
        let mut egress = FlvEgress::new(queue);

        let types: Vec<u8> = (0..4).map(|_| egress.next_ready().unwrap()[0]).collect();
        assert_eq!(
            types,
            vec![flv::TAG_SCRIPT, flv::TAG_VIDEO, flv::TAG_AUDIO, flv::TAG_VIDEO]
        );
    }

    #[test]
    fn test_timestamp_rebase_monotonic() {
        let queue = queue_with(vec![
            video(9000, &[0x17, 0x01]),
            video(9040, &[0x27, 0x01]),
            audio(9060, &[0xAF, 0x01]),
            video(9080, &[0x27, 0x01]),
        ]);
        let mut egress = FlvEgress::new(queue);

        let stamps: Vec<u32> = (0..4)
            .map(|_| tag_timestamp(&egress.next_ready().unwrap()))
            .collect();
        assert_eq!(stamps, vec![0, 40, 60, 80]);
    }

    #[test]
    fn test_timestamp_underflow_clamps_to_zero() {
        let queue = queue_with(vec![
            video(1000, &[0x17, 0x01]),
            // A message stamped before the offset must not wrap around.
            audio(900, &[0xAF, 0x01]),
        ]);
        let mut egress = FlvEgress::new(queue);
        egress.next_ready().unwrap();
        let late = egress.next_ready().unwrap();
        assert_eq!(tag_timestamp(&late), 0);
    }

    #[test]
    fn test_init_always_time_zero_even_after_offset() {
        let queue = queue_with(vec![
            video(5000, &[0x17, 0x01]),
            init(MessageKind::Video, &[0x17, 0x00]),
        ]);
        let mut egress = FlvEgress::new(queue);
        egress.next_ready().unwrap();
        let reinit = egress.next_ready().unwrap();
        assert_eq!(tag_timestamp(&reinit), 0);
    }

    #[test]
    fn test_prologue_shape() {
        let prologue = FlvEgress::prologue();
        assert_eq!(&prologue[0..3], b"FLV");
        assert_eq!(prologue.len(), 13);
    }

    #[test]
    fn test_guard_detaches_on_drop() {
        let registry = Arc::new(Registry::new());
        let (stream, _) = registry.get_or_create(StreamKey::new("live", "cam"));

        let (guard, _egress) = SubscriberGuard::attach(Arc::clone(&stream), Arc::clone(&registry));
        assert_eq!(stream.subscriber_count(), 1);
        assert_eq!(registry.count(), 1);

        drop(guard);
        assert_eq!(stream.subscriber_count(), 0);
        // Stream was empty after detach, so the registry entry is gone.
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_next_tag_waits_for_data() {
        let queue = Arc::new(RingQueue::new(8, BackpressureStrategy::DropOldest));
        let mut egress = FlvEgress::new(Arc::clone(&queue));

        let writer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                queue.write(Arc::new(video(0, &[0x17, 0x01])));
            })
        };

        let tag = tokio::time::timeout(Duration::from_secs(1), egress.next_tag())
            .await
            .expect("tag within deadline");
        assert_eq!(tag[0], flv::TAG_VIDEO);
        writer.await.unwrap();
    }
}
