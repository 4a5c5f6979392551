//! RTMP wire protocol: constants, handshake, and the chunk codec

pub mod chunk;
pub mod constants;
pub mod handshake;

pub use chunk::{ChunkDecoder, ChunkEncoder, RawMessage};
pub use handshake::{Handshake, HandshakeRole};
