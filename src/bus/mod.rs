//! Stream bus: pooled messages, per-subscriber ring queues, fanout, and the
//! stream registry. This is the hub between RTMP ingest and FLV egress.

pub mod message;
pub mod registry;
pub mod ring;
pub mod stream;

pub use message::{payload_pool, MediaMessage, MessageKind};
pub use registry::{Registry, StreamKey, DEFAULT_APP};
pub use ring::{BackpressureStrategy, RingQueue};
pub use stream::{Stream, Subscriber};
