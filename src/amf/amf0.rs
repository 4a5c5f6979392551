//! AMF0 encoder and decoder
//!
//! Implements the subset of AMF0 used by RTMP command messages.
//!
//! Type markers:
//! ```text
//! 0x00 Number        0x05 Null          0x0A Strict Array
//! 0x01 Boolean       0x06 Undefined     0x0C Long String
//! 0x02 String        0x08 ECMA Array
//! 0x03 Object        0x09 Object End
//! ```
//!
//! A command message body is a plain *sequence* of AMF0 values (name,
//! transaction id, command object, further arguments) with no enclosing
//! array, so the first byte of any encoded command is the 0x02 string
//! marker of its name.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use super::value::AmfValue;
use crate::error::AmfError;

const MARKER_NUMBER: u8 = 0x00;
const MARKER_BOOLEAN: u8 = 0x01;
const MARKER_STRING: u8 = 0x02;
const MARKER_OBJECT: u8 = 0x03;
const MARKER_NULL: u8 = 0x05;
const MARKER_UNDEFINED: u8 = 0x06;
const MARKER_ECMA_ARRAY: u8 = 0x08;
const MARKER_OBJECT_END: u8 = 0x09;
const MARKER_STRICT_ARRAY: u8 = 0x0A;
const MARKER_LONG_STRING: u8 = 0x0C;

/// Maximum nesting depth for objects/arrays (prevent stack overflow on
/// hostile input)
const MAX_NESTING_DEPTH: usize = 32;

/// AMF0 decoder
pub struct Amf0Decoder {
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Decode a single value from the buffer.
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEnd);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::InvalidData);
        }

        let marker = buf.get_u8();
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode values until the buffer is exhausted.
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    /// Advance past one value of any supported type without building it.
    /// Used to ignore trailing command arguments we do not consume.
    pub fn skip_any(&mut self, buf: &mut Bytes) -> Result<(), AmfError> {
        if buf.is_empty() {
            return Err(AmfError::UnexpectedEnd);
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.depth -= 1;
            return Err(AmfError::InvalidData);
        }

        let marker = buf.get_u8();
        let result = self.skip_value(marker, buf);
        self.depth -= 1;
        result
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => {
                if buf.remaining() < 8 {
                    return Err(AmfError::UnexpectedEnd);
                }
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_BOOLEAN => {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEnd);
                }
                Ok(AmfValue::Boolean(buf.get_u8() != 0))
            }
            MARKER_STRING => Ok(AmfValue::String(read_utf8(buf)?)),
            MARKER_LONG_STRING => Ok(AmfValue::String(read_utf8_long(buf)?)),
            MARKER_OBJECT => self.decode_object_body(buf),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED => Ok(AmfValue::Undefined),
            MARKER_ECMA_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEnd);
                }
                // The count is a hint; the body is object-shaped.
                let _count = buf.get_u32();
                self.decode_object_body(buf)
            }
            MARKER_STRICT_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEnd);
                }
                let count = buf.get_u32() as usize;
                let mut elements = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    elements.push(self.decode(buf)?);
                }
                Ok(AmfValue::Array(elements))
            }
            other => Err(AmfError::UnexpectedType(other)),
        }
    }

    fn decode_object_body(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let mut properties = HashMap::new();
        loop {
            let key = read_utf8(buf)?;
            if key.is_empty() {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEnd);
                }
                if buf.get_u8() != MARKER_OBJECT_END {
                    return Err(AmfError::InvalidData);
                }
                break;
            }
            let value = self.decode(buf)?;
            properties.insert(key, value);
        }
        Ok(AmfValue::Object(properties))
    }

    fn skip_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<(), AmfError> {
        match marker {
            MARKER_NUMBER => skip_bytes(buf, 8),
            MARKER_BOOLEAN => skip_bytes(buf, 1),
            MARKER_STRING => {
                let len = read_u16_len(buf)?;
                skip_bytes(buf, len)
            }
            MARKER_LONG_STRING => {
                let len = read_u32_len(buf)?;
                skip_bytes(buf, len)
            }
            MARKER_NULL | MARKER_UNDEFINED => Ok(()),
            MARKER_OBJECT => self.skip_object_body(buf),
            MARKER_ECMA_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEnd);
                }
                let _count = buf.get_u32();
                self.skip_object_body(buf)
            }
            MARKER_STRICT_ARRAY => {
                if buf.remaining() < 4 {
                    return Err(AmfError::UnexpectedEnd);
                }
                let count = buf.get_u32();
                for _ in 0..count {
                    self.skip_any(buf)?;
                }
                Ok(())
            }
            other => Err(AmfError::UnexpectedType(other)),
        }
    }

    fn skip_object_body(&mut self, buf: &mut Bytes) -> Result<(), AmfError> {
        loop {
            let len = read_u16_len(buf)?;
            if len == 0 {
                if buf.is_empty() {
                    return Err(AmfError::UnexpectedEnd);
                }
                if buf.get_u8() != MARKER_OBJECT_END {
                    return Err(AmfError::InvalidData);
                }
                return Ok(());
            }
            skip_bytes(buf, len)?;
            self.skip_any(buf)?;
        }
    }
}

impl Default for Amf0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn skip_bytes(buf: &mut Bytes, n: usize) -> Result<(), AmfError> {
    if buf.remaining() < n {
        return Err(AmfError::UnexpectedEnd);
    }
    buf.advance(n);
    Ok(())
}

fn read_u16_len(buf: &mut Bytes) -> Result<usize, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::UnexpectedEnd);
    }
    Ok(buf.get_u16() as usize)
}

fn read_u32_len(buf: &mut Bytes) -> Result<usize, AmfError> {
    if buf.remaining() < 4 {
        return Err(AmfError::UnexpectedEnd);
    }
    Ok(buf.get_u32() as usize)
}

/// Read a UTF-8 string with a 16-bit length prefix.
fn read_utf8(buf: &mut Bytes) -> Result<String, AmfError> {
    let len = read_u16_len(buf)?;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEnd);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidData)
}

/// Read a UTF-8 string with a 32-bit length prefix.
fn read_utf8_long(buf: &mut Bytes) -> Result<String, AmfError> {
    let len = read_u32_len(buf)?;
    if buf.remaining() < len {
        return Err(AmfError::UnexpectedEnd);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidData)
}

/// AMF0 encoder
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Take the encoded bytes and reset the encoder.
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Encode a single value.
    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::String(s) => {
                if s.len() > usize::from(u16::MAX) {
                    self.buf.put_u8(MARKER_LONG_STRING);
                    self.buf.put_u32(s.len() as u32);
                } else {
                    self.buf.put_u8(MARKER_STRING);
                    self.buf.put_u16(s.len() as u16);
                }
                self.buf.put_slice(s.as_bytes());
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                for (key, val) in props {
                    self.write_utf8(key);
                    self.encode(val);
                }
                self.buf.put_u16(0);
                self.buf.put_u8(MARKER_OBJECT_END);
            }
            AmfValue::Null => {
                self.buf.put_u8(MARKER_NULL);
            }
            AmfValue::Undefined => {
                self.buf.put_u8(MARKER_UNDEFINED);
            }
            AmfValue::Array(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem);
                }
            }
        }
    }

    /// Encode multiple values back to back.
    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    /// UTF-8 string with a 16-bit length prefix and no type marker.
    fn write_utf8(&mut self, s: &str) {
        let len = s.len().min(usize::from(u16::MAX));
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a command message body: a sequence of values, no array wrapper.
pub fn encode_command(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

/// Convenience: encode a single value.
pub fn encode(value: &AmfValue) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value);
    encoder.finish()
}

/// Convenience: decode a single value.
pub fn decode(data: &[u8]) -> Result<AmfValue, AmfError> {
    let mut buf = Bytes::copy_from_slice(data);
    Amf0Decoder::new().decode(&mut buf)
}

/// Convenience: decode every value in the slice.
pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut buf = Bytes::copy_from_slice(data);
    Amf0Decoder::new().decode_all(&mut buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amf_object;

    #[test]
    fn test_number_roundtrip() {
        let value = AmfValue::Number(42.5);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn test_boolean_roundtrip() {
        for b in [true, false] {
            let value = AmfValue::Boolean(b);
            assert_eq!(decode(&encode(&value)).unwrap(), value);
        }
    }

    #[test]
    fn test_string_roundtrip() {
        let value = AmfValue::String("hello world".into());
        let encoded = encode(&value);
        assert_eq!(encoded[0], 0x02);
        assert_eq!(decode(&encoded).unwrap(), value);
    }

    #[test]
    fn test_long_string_roundtrip() {
        let s = "x".repeat(70_000);
        let value = AmfValue::String(s.clone());
        let encoded = encode(&value);
        assert_eq!(encoded[0], 0x0C);
        assert_eq!(decode(&encoded).unwrap(), AmfValue::String(s));
    }

    #[test]
    fn test_null_and_undefined_roundtrip() {
        assert_eq!(decode(&encode(&AmfValue::Null)).unwrap(), AmfValue::Null);
        assert_eq!(
            decode(&encode(&AmfValue::Undefined)).unwrap(),
            AmfValue::Undefined
        );
    }

    #[test]
    fn test_object_roundtrip() {
        let value = amf_object! {
            "name" => "test",
            "value" => 123.0,
            "flag" => true,
        };
        let decoded = decode(&encode(&value)).unwrap();
        // Key order is unspecified; compare as maps.
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_strict_array_roundtrip() {
        let value = AmfValue::Array(vec![
            AmfValue::Number(1.0),
            AmfValue::String("two".into()),
            AmfValue::Boolean(true),
            AmfValue::Null,
        ]);
        assert_eq!(decode(&encode(&value)).unwrap(), value);
    }

    #[test]
    fn test_ecma_array_decodes_as_object() {
        // count=1, "k" -> number 7, end marker
        let mut data = vec![0x08, 0, 0, 0, 1];
        data.extend_from_slice(&[0, 1, b'k']);
        data.push(0x00);
        data.extend_from_slice(&7.0f64.to_be_bytes());
        data.extend_from_slice(&[0, 0, 0x09]);

        let decoded = decode(&data).unwrap();
        assert_eq!(
            decoded.field("k").and_then(|v| v.as_number()),
            Some(7.0)
        );
    }

    #[test]
    fn test_decode_all_sequence() {
        let values = vec![
            AmfValue::String("connect".into()),
            AmfValue::Number(1.0),
            AmfValue::Null,
        ];
        let mut encoder = Amf0Encoder::new();
        encoder.encode_all(&values);
        assert_eq!(decode_all(&encoder.finish()).unwrap(), values);
    }

    #[test]
    fn test_encode_command_first_byte_is_string_marker() {
        let body = encode_command(&[
            AmfValue::String("_result".into()),
            AmfValue::Number(1.0),
            amf_object! { "fmsVer" => "FMS/3,0,1,123" },
            amf_object! { "level" => "status" },
        ]);
        // Never a strict-array wrapper.
        assert_eq!(body[0], 0x02);
        assert_ne!(body[0], 0x0A);
        let decoded = decode_all(&body).unwrap();
        assert_eq!(decoded[0].as_str(), Some("_result"));
        assert_eq!(decoded[1].as_number(), Some(1.0));
    }

    #[test]
    fn test_skip_any_over_each_type() {
        let mut encoder = Amf0Encoder::new();
        encoder.encode_all(&[
            AmfValue::Number(3.0),
            AmfValue::Boolean(false),
            AmfValue::String("skipped".into()),
            amf_object! { "nested" => 1.0 },
            AmfValue::Null,
            AmfValue::Undefined,
            AmfValue::Array(vec![AmfValue::Number(1.0), AmfValue::String("a".into())]),
            AmfValue::String("sentinel".into()),
        ]);
        let mut buf = encoder.finish();

        let mut decoder = Amf0Decoder::new();
        for _ in 0..7 {
            decoder.skip_any(&mut buf).unwrap();
        }
        let last = decoder.decode(&mut buf).unwrap();
        assert_eq!(last.as_str(), Some("sentinel"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated_input() {
        // String claims 10 bytes but carries 2.
        let data = [0x02, 0x00, 0x0A, b'h', b'i'];
        assert_eq!(decode(&data), Err(AmfError::UnexpectedEnd));

        // Number cut short.
        let data = [0x00, 0x3F, 0xF0];
        assert_eq!(decode(&data), Err(AmfError::UnexpectedEnd));
    }

    #[test]
    fn test_unsupported_marker() {
        // 0x0B (date) is outside the supported subset.
        let data = [0x0B, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(decode(&data), Err(AmfError::UnexpectedType(0x0B)));
    }

    #[test]
    fn test_bad_object_terminator() {
        // Empty key followed by a non-end marker.
        let data = [0x03, 0x00, 0x00, 0x05];
        assert_eq!(decode(&data), Err(AmfError::InvalidData));
    }
}
