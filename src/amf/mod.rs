//! AMF0 serialization for RTMP command messages

pub mod amf0;
pub mod value;

pub use amf0::{decode, decode_all, encode, encode_command, Amf0Decoder, Amf0Encoder};
pub use value::AmfValue;
