//! Stream registry: key to stream lifecycle
//!
//! Streams are created on first reference (publisher or subscriber attach)
//! and removed once idle via `remove_if_empty`. One mutex guards the map;
//! streams carry their own lock, and the two are never held together.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::stream::Stream;

/// Default application name when a publisher does not supply one.
pub const DEFAULT_APP: &str = "live";

/// Identifies a stream by `(application, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub app: String,
    pub name: String,
}

impl StreamKey {
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app, self.name)
    }
}

/// Process-wide map of active streams.
pub struct Registry {
    streams: Mutex<HashMap<StreamKey, Arc<Stream>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the stream for `key`, creating it if absent.
    /// The boolean is true when the stream was newly created.
    pub fn get_or_create(&self, key: StreamKey) -> (Arc<Stream>, bool) {
        let mut streams = self.streams.lock();
        if let Some(stream) = streams.get(&key) {
            return (Arc::clone(stream), false);
        }
        let stream = Arc::new(Stream::new(key.clone()));
        streams.insert(key, Arc::clone(&stream));
        (stream, true)
    }

    pub fn get(&self, key: &StreamKey) -> Option<Arc<Stream>> {
        self.streams.lock().get(key).cloned()
    }

    /// Remove a stream, but only when it has no publisher and no
    /// subscribers. Returns whether a removal happened.
    pub fn remove_if_empty(&self, key: &StreamKey) -> bool {
        let mut streams = self.streams.lock();
        let Some(stream) = streams.get(key) else {
            return false;
        };
        if !stream.is_empty() {
            return false;
        }
        streams.remove(key);
        true
    }

    pub fn list(&self) -> Vec<StreamKey> {
        self.streams.lock().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.streams.lock().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
