//! AMF0 value model
//!
//! Only the types RTMP command messages actually use. ECMA arrays decode to
//! `Object` (the count prefix is a hint, not a contract).

use std::collections::HashMap;

/// A decoded AMF0 value.
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// IEEE 754 double (marker 0x00)
    Number(f64),
    /// Boolean (0x01)
    Boolean(bool),
    /// UTF-8 string, short (0x02) or long (0x0C)
    String(String),
    /// Key-value pairs (0x03), also the decoded form of ECMA arrays (0x08)
    Object(HashMap<String, AmfValue>),
    /// Null (0x05)
    Null,
    /// Undefined (0x06)
    Undefined,
    /// Strict array (0x0A)
    Array(Vec<AmfValue>),
}

impl AmfValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, AmfValue>> {
        match self {
            AmfValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Object field lookup, None for non-objects and absent keys.
    pub fn field(&self, key: &str) -> Option<&AmfValue> {
        self.as_object().and_then(|map| map.get(key))
    }
}

impl From<f64> for AmfValue {
    fn from(n: f64) -> Self {
        AmfValue::Number(n)
    }
}

impl From<bool> for AmfValue {
    fn from(b: bool) -> Self {
        AmfValue::Boolean(b)
    }
}

impl From<&str> for AmfValue {
    fn from(s: &str) -> Self {
        AmfValue::String(s.to_string())
    }
}

impl From<String> for AmfValue {
    fn from(s: String) -> Self {
        AmfValue::String(s)
    }
}

/// Build an `AmfValue::Object` from key-value pairs.
#[macro_export]
macro_rules! amf_object {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(map.insert($key.to_string(), $crate::amf::AmfValue::from($value));)*
        $crate::amf::AmfValue::Object(map)
    }};
}
