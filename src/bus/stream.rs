//! Stream: one publisher slot, many subscribers
//!
//! A `Stream` fans messages published by its single publisher out to every
//! attached subscriber's ring queue. Init messages (codec sequence headers
//! and `onMetaData`) are cached as deep clones and replayed to late-joining
//! subscribers so a client that attaches minutes into the broadcast still
//! receives codec configuration before any live frame.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::message::{MediaMessage, MessageKind};
use super::registry::StreamKey;
use super::ring::{BackpressureStrategy, RingQueue};

/// A subscriber handle: an id for detach plus the queue the fanout feeds.
pub struct Subscriber {
    id: u64,
    queue: Arc<RingQueue>,
}

impl Subscriber {
    /// Opaque id, used to detach from the stream.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The ring queue this subscriber drains.
    pub fn queue(&self) -> &Arc<RingQueue> {
        &self.queue
    }
}

struct StreamInner {
    publisher: Option<u64>,
    subscribers: HashMap<u64, Arc<RingQueue>>,
    next_sub_id: u64,
    // Cached init messages, deep-cloned at publish time. Cleared when the
    // publisher detaches: they belong to that publisher's session.
    init_video: Option<Arc<MediaMessage>>,
    init_audio: Option<Arc<MediaMessage>>,
    init_meta: Option<Arc<MediaMessage>>,
}

/// A live media stream instance.
pub struct Stream {
    key: StreamKey,
    inner: Mutex<StreamInner>,
}

impl Stream {
    pub fn new(key: StreamKey) -> Self {
        Self {
            key,
            inner: Mutex::new(StreamInner {
                publisher: None,
                subscribers: HashMap::new(),
                next_sub_id: 1,
                init_video: None,
                init_audio: None,
                init_meta: None,
            }),
        }
    }

    /// The stream's key.
    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Attach a publisher. Returns false if the slot is already held.
    pub fn attach_publisher(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.publisher.is_some() {
            return false;
        }
        inner.publisher = Some(id);
        true
    }

    /// Detach the publisher and clear the cached init messages.
    pub fn detach_publisher(&self) {
        let mut inner = self.inner.lock();
        inner.publisher = None;
        inner.init_video = None;
        inner.init_audio = None;
        inner.init_meta = None;
    }

    pub fn has_publisher(&self) -> bool {
        self.inner.lock().publisher.is_some()
    }

    /// Attach a subscriber. Cached init messages are replayed into the new
    /// queue in the fixed order metadata, video, audio before any live
    /// message can arrive.
    pub fn attach_subscriber(&self, capacity: u32, strategy: BackpressureStrategy) -> Subscriber {
        let mut inner = self.inner.lock();
        let id = inner.next_sub_id;
        inner.next_sub_id += 1;

        let queue = Arc::new(RingQueue::new(capacity, strategy));
        if let Some(meta) = &inner.init_meta {
            queue.write(Arc::clone(meta));
        }
        if let Some(video) = &inner.init_video {
            queue.write(Arc::clone(video));
        }
        if let Some(audio) = &inner.init_audio {
            queue.write(Arc::clone(audio));
        }

        inner.subscribers.insert(id, Arc::clone(&queue));
        Subscriber { id, queue }
    }

    pub fn detach_subscriber(&self, id: u64) {
        self.inner.lock().subscribers.remove(&id);
    }

    /// Fan a message out to every subscriber.
    ///
    /// The lock is held only to cache an init clone and snapshot the
    /// subscriber list; the enqueues happen outside it, so a subscriber
    /// detaching can never stall the publisher mid-fanout.
    pub fn publish(&self, msg: Arc<MediaMessage>) {
        let targets: Vec<Arc<RingQueue>> = {
            let mut inner = self.inner.lock();
            if msg.is_init {
                let clone = Arc::new(msg.deep_clone());
                match msg.kind {
                    MessageKind::Video => inner.init_video = Some(clone),
                    MessageKind::Audio => inner.init_audio = Some(clone),
                    MessageKind::Metadata => inner.init_meta = Some(clone),
                }
            }
            inner.subscribers.values().cloned().collect()
        };

        for queue in targets {
            queue.write(Arc::clone(&msg));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// True when the stream has neither a publisher nor subscribers.
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.publisher.is_none() && inner.subscribers.is_empty()
    }
}
