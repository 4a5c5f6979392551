//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)

/// RTMP version byte carried in C0/S0
pub const RTMP_VERSION: u8 = 3;

/// C1/S1/C2/S2 packet size
pub const HANDSHAKE_SIZE: usize = 1536;

/// Chunk size both sides start with, per the RTMP spec
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Outgoing chunk size adopted after `connect` (reduces header overhead)
pub const OUT_CHUNK_SIZE: u32 = 4096;

/// Maximum chunk size a peer may announce
pub const MAX_CHUNK_SIZE: u32 = 0xFF_FFFF;

/// Sanity limit on a reassembled message
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Timestamp values at or above this use the extended timestamp field
pub const EXTENDED_TIMESTAMP: u32 = 0xFF_FFFF;

/// Window we announce to publishers on `connect`
pub const WINDOW_ACK_SIZE: u32 = 5_000_000;

/// Peer bandwidth we announce on `connect`
pub const PEER_BANDWIDTH: u32 = 5_000_000;

/// Cumulative ack counter resets once it crosses this value, matching the
/// behavior of incumbent RTMP implementations
pub const ACK_RESET_THRESHOLD: u32 = 0xF000_0000;

// Chunk stream ids
pub const CSID_PROTOCOL_CONTROL: u32 = 2;
pub const CSID_COMMAND: u32 = 3;
pub const CSID_STATUS: u32 = 5;

// Message type ids
pub const MSG_SET_CHUNK_SIZE: u8 = 1;
pub const MSG_ABORT: u8 = 2;
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;
pub const MSG_USER_CONTROL: u8 = 4;
pub const MSG_WINDOW_ACK_SIZE: u8 = 5;
pub const MSG_SET_PEER_BANDWIDTH: u8 = 6;
pub const MSG_AUDIO: u8 = 8;
pub const MSG_VIDEO: u8 = 9;
pub const MSG_DATA_AMF0: u8 = 18;
pub const MSG_COMMAND_AMF0: u8 = 20;

/// User-control event: Stream Begin
pub const UC_STREAM_BEGIN: u16 = 0;

/// Set Peer Bandwidth limit type: dynamic
pub const BANDWIDTH_LIMIT_DYNAMIC: u8 = 2;

// Command names
pub const CMD_CONNECT: &str = "connect";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_RELEASE_STREAM: &str = "releaseStream";
pub const CMD_FC_PUBLISH: &str = "FCPublish";
pub const CMD_FC_UNPUBLISH: &str = "FCUnpublish";
pub const CMD_RESULT: &str = "_result";
pub const CMD_ON_STATUS: &str = "onStatus";

// Status codes
pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NS_PUBLISH_START: &str = "NetStream.Publish.Start";

/// fmsVer reported in the `connect` response
pub const FMS_VERSION: &str = "FMS/3,0,1,123";

/// capabilities reported in the `connect` response
pub const FMS_CAPABILITIES: f64 = 31.0;
