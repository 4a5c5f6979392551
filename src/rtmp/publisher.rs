//! Publisher binding: RTMP media messages into the bus
//!
//! Owns the session's attachment to a bus stream. Incoming audio/video/data
//! payloads are classified (sequence header or live frame), copied into
//! pooled buffers, and fanned out via `Stream::publish`.

use std::sync::Arc;

use crate::bus::{MediaMessage, MessageKind, Registry, Stream, StreamKey};
use crate::flv;

/// The RTMP-specific prefix some publishers put in front of `onMetaData`:
/// a string marker, a 16-bit length of 13, and the text itself.
const SET_DATA_FRAME: &[u8] = b"\x02\x00\x0d@setDataFrame";

/// A session's hold on a bus stream as its single publisher.
pub struct Publisher {
    stream: Arc<Stream>,
    id: u64,
}

impl Publisher {
    pub fn new(stream: Arc<Stream>, id: u64) -> Self {
        Self { stream, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream_key(&self) -> &StreamKey {
        self.stream.key()
    }

    /// Publish an audio payload. AAC sequence headers are flagged as init
    /// so late joiners receive the AudioSpecificConfig.
    pub fn publish_audio(&self, timestamp: u32, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        let is_init = flv::is_aac_sequence_header(payload);
        self.stream.publish(Arc::new(MediaMessage::copy_from(
            MessageKind::Audio,
            timestamp,
            is_init,
            payload,
        )));
    }

    /// Publish a video payload. AVC sequence headers are flagged as init so
    /// late joiners receive the decoder configuration record.
    pub fn publish_video(&self, timestamp: u32, payload: &[u8]) {
        if payload.is_empty() {
            return;
        }
        let is_init = flv::is_avc_sequence_header(payload);
        self.stream.publish(Arc::new(MediaMessage::copy_from(
            MessageKind::Video,
            timestamp,
            is_init,
            payload,
        )));
    }

    /// Publish script data. The `@setDataFrame` wrapper is dropped so the
    /// body starts with `onMetaData`; metadata is always cached as init.
    pub fn publish_metadata(&self, timestamp: u32, payload: &[u8]) {
        let body = payload
            .strip_prefix(SET_DATA_FRAME)
            .unwrap_or(payload);
        if body.is_empty() {
            return;
        }
        self.stream.publish(Arc::new(MediaMessage::copy_from(
            MessageKind::Metadata,
            timestamp,
            true,
            body,
        )));
    }

    /// Release the publisher slot (clears the stream's init cache) and drop
    /// the stream from the registry if nobody is left.
    pub fn detach(&self, registry: &Registry) {
        self.stream.detach_publisher();
        registry.remove_if_empty(self.stream.key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BackpressureStrategy;

    fn setup() -> (Registry, Arc<Stream>, Publisher) {
        let registry = Registry::new();
        let (stream, _) = registry.get_or_create(StreamKey::new("live", "cam1"));
        assert!(stream.attach_publisher(7));
        let publisher = Publisher::new(Arc::clone(&stream), 7);
        (registry, stream, publisher)
    }

    #[test]
    fn test_sequence_headers_marked_init() {
        let (_registry, stream, publisher) = setup();
        let sub = stream.attach_subscriber(16, BackpressureStrategy::DropOldest);

        publisher.publish_video(0, &[0x17, 0x00, 0x00, 0x00, 0x00]);
        publisher.publish_audio(0, &[0xAF, 0x00, 0x12, 0x10]);
        publisher.publish_video(40, &[0x17, 0x01, 0xAA]);
        publisher.publish_audio(40, &[0xAF, 0x01, 0xBB]);

        let video_init = sub.queue().read().unwrap();
        assert!(video_init.is_init);
        let audio_init = sub.queue().read().unwrap();
        assert!(audio_init.is_init);
        assert!(!sub.queue().read().unwrap().is_init);
        assert!(!sub.queue().read().unwrap().is_init);
    }

    #[test]
    fn test_set_data_frame_prefix_stripped() {
        let (_registry, stream, publisher) = setup();
        let sub = stream.attach_subscriber(4, BackpressureStrategy::DropOldest);

        let mut payload = Vec::from(SET_DATA_FRAME);
        payload.extend_from_slice(b"\x02\x00\x0aonMetaData");
        publisher.publish_metadata(0, &payload);

        let msg = sub.queue().read().unwrap();
        assert_eq!(msg.kind, MessageKind::Metadata);
        assert!(msg.is_init);
        assert_eq!(msg.payload(), b"\x02\x00\x0aonMetaData");
    }

    #[test]
    fn test_bare_metadata_kept_as_is() {
        let (_registry, stream, publisher) = setup();
        let sub = stream.attach_subscriber(4, BackpressureStrategy::DropOldest);

        publisher.publish_metadata(0, b"\x02\x00\x0aonMetaData");
        let msg = sub.queue().read().unwrap();
        assert_eq!(msg.payload(), b"\x02\x00\x0aonMetaData");
    }

    #[test]
    fn test_empty_payloads_ignored() {
        let (_registry, stream, publisher) = setup();
        let sub = stream.attach_subscriber(4, BackpressureStrategy::DropOldest);
        publisher.publish_audio(0, &[]);
        publisher.publish_video(0, &[]);
        assert!(sub.queue().read().is_none());
    }

    #[test]
    fn test_detach_releases_slot_and_registry_entry() {
        let (registry, stream, publisher) = setup();
        assert_eq!(registry.count(), 1);

        publisher.detach(&registry);
        assert!(!stream.has_publisher());
        assert_eq!(registry.count(), 0);
    }
}
