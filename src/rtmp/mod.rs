//! RTMP ingest service: publisher sessions, command handling, and the bridge
//! from media messages into the stream bus

pub mod connection;
pub mod publisher;
pub mod server;
pub mod session;

pub use connection::Connection;
pub use publisher::Publisher;
pub use server::RtmpServer;
pub use session::{AckTracker, SessionState};
