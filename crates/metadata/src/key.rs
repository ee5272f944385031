//! Join keys: typed key values, their order-preserving byte encoding, and the
//! comparator identifier persisted with every dataset.
//!
//! Every key is reduced to a byte string whose lexicographic order matches the
//! natural order of the typed value. Hashing, sorting and merging all work on
//! those bytes, so the writer and every reader agree on bucket placement and
//! sort order without knowing anything about the record format.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::MetadataError;

const SIGN_BIT: u64 = 1 << 63;

/// Logical type of a dataset's join key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Bytes,
    String,
    Int64,
    UInt64,
}

impl KeyType {
    /// Encodes `value` into order-preserving key bytes.
    ///
    /// `field` is only used to build a useful error message.
    pub fn encode(&self, field: &str, value: KeyValue) -> Result<Key, MetadataError> {
        let mismatch = |found: &'static str| MetadataError::KeyTypeMismatch {
            field: field.to_string(),
            expected: *self,
            found,
        };

        let bytes = match (self, value) {
            (KeyType::Bytes, KeyValue::Bytes(b)) => b,
            (KeyType::Bytes, KeyValue::Str(s)) => s.into_bytes(),
            (KeyType::String, KeyValue::Str(s)) => s.into_bytes(),
            (KeyType::String, KeyValue::Bytes(b)) => String::from_utf8(b)
                .map_err(|_| mismatch("non-utf8 bytes"))?
                .into_bytes(),
            (KeyType::Int64, KeyValue::Int(i)) => ((i as u64) ^ SIGN_BIT).to_be_bytes().to_vec(),
            (KeyType::Int64, KeyValue::UInt(u)) => {
                let i = i64::try_from(u).map_err(|_| mismatch("u64 out of i64 range"))?;
                ((i as u64) ^ SIGN_BIT).to_be_bytes().to_vec()
            }
            (KeyType::UInt64, KeyValue::UInt(u)) => u.to_be_bytes().to_vec(),
            (KeyType::UInt64, KeyValue::Int(i)) => {
                let u = u64::try_from(i).map_err(|_| mismatch("negative integer"))?;
                u.to_be_bytes().to_vec()
            }
            (_, other) => return Err(mismatch(other.kind())),
        };

        Ok(Key(bytes))
    }

    /// Decodes key bytes produced by [`encode`](KeyType::encode) back into a
    /// typed value. Returns `None` if the bytes are not a valid encoding.
    pub fn decode(&self, key: &Key) -> Option<KeyValue> {
        let bytes = key.as_bytes();
        match self {
            KeyType::Bytes => Some(KeyValue::Bytes(bytes.to_vec())),
            KeyType::String => String::from_utf8(bytes.to_vec()).ok().map(KeyValue::Str),
            KeyType::Int64 => {
                let raw: [u8; 8] = bytes.try_into().ok()?;
                Some(KeyValue::Int((u64::from_be_bytes(raw) ^ SIGN_BIT) as i64))
            }
            KeyType::UInt64 => {
                let raw: [u8; 8] = bytes.try_into().ok()?;
                Some(KeyValue::UInt(u64::from_be_bytes(raw)))
            }
        }
    }

    /// Renders key bytes for logs, error messages and the shell.
    pub fn render(&self, key: &Key) -> String {
        match self.decode(key) {
            Some(KeyValue::Str(s)) => s,
            Some(KeyValue::Int(i)) => i.to_string(),
            Some(KeyValue::UInt(u)) => u.to_string(),
            Some(KeyValue::Bytes(_)) | None => key.to_string(),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeyType::Bytes => "bytes",
            KeyType::String => "string",
            KeyType::Int64 => "int64",
            KeyType::UInt64 => "uint64",
        };
        f.write_str(s)
    }
}

impl FromStr for KeyType {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bytes" => Ok(KeyType::Bytes),
            "string" => Ok(KeyType::String),
            "int64" | "long" => Ok(KeyType::Int64),
            "uint64" => Ok(KeyType::UInt64),
            _ => Err(MetadataError::UnknownIdentifier {
                kind: "key type",
                value: s.to_string(),
            }),
        }
    }
}

/// Total order over encoded keys; persisted as the dataset's comparator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyOrder {
    #[default]
    Ascending,
    Descending,
}

impl KeyOrder {
    #[inline]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyOrder::Ascending => a.cmp(b),
            KeyOrder::Descending => b.cmp(a),
        }
    }
}

impl fmt::Display for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrder::Ascending => f.write_str("ascending"),
            KeyOrder::Descending => f.write_str("descending"),
        }
    }
}

impl FromStr for KeyOrder {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascending" | "asc" => Ok(KeyOrder::Ascending),
            "descending" | "desc" => Ok(KeyOrder::Descending),
            _ => Err(MetadataError::UnknownIdentifier {
                kind: "key order",
                value: s.to_string(),
            }),
        }
    }
}

/// A key value as found in a record, before encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValue {
    Bytes(Vec<u8>),
    Str(String),
    Int(i64),
    UInt(u64),
}

impl KeyValue {
    fn kind(&self) -> &'static str {
        match self {
            KeyValue::Bytes(_) => "bytes",
            KeyValue::Str(_) => "string",
            KeyValue::Int(_) => "int64",
            KeyValue::UInt(_) => "uint64",
        }
    }
}

/// An encoded join key.
///
/// The derived `Ord` is plain byte order; use [`KeyOrder::compare`] wherever
/// the dataset's comparator matters.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Key(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

/// Printable UTF-8 keys are shown as-is, anything else as lowercase hex.
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if !s.chars().any(char::is_control) => f.write_str(s),
            _ => {
                f.write_str("0x")?;
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Implemented by record types so that a dataset's key can be pulled out of
/// them by field name.
pub trait ExtractKey {
    /// Returns the value stored under `field`, or `Ok(None)` when the record
    /// carries no key (missing or null).
    fn extract_key(&self, field: &str) -> Result<Option<KeyValue>, MetadataError>;
}
