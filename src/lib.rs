//! livebus: live-media ingest and fanout
//!
//! A publisher delivers an H.264/AAC stream over RTMP; the server caches the
//! codec init data and fans the stream out to any number of HTTP-FLV and
//! WebSocket-FLV subscribers. Streams are named by an `(app, name)` pair and
//! owned by exactly one publisher at a time.
//!
//! The crate splits into three layers:
//! - [`bus`] — pooled messages, per-subscriber ring queues, fanout, and the
//!   stream registry
//! - [`protocol`], [`amf`], [`rtmp`] — the RTMP ingest pipeline
//! - [`flv`], [`egress`], [`http`] — FLV framing and subscriber delivery

pub mod amf;
pub mod bus;
pub mod config;
pub mod egress;
pub mod error;
pub mod flv;
pub mod http;
pub mod protocol;
pub mod rtmp;

pub use bus::{Registry, StreamKey};
pub use config::Config;
pub use error::{Error, Result};
pub use rtmp::RtmpServer;
