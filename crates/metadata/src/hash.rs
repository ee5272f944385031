//! Deterministic key hashing used to place keys into buckets.

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

use crate::MetadataError;

/// Hash algorithm applied to encoded key bytes.
///
/// The identifier is persisted in the descriptor; two datasets can only be
/// merge-joined when they use the same algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    #[default]
    Xxh3,
    Crc32,
}

impl HashType {
    #[inline]
    pub fn hash(&self, bytes: &[u8]) -> u64 {
        match self {
            HashType::Xxh3 => xxh3_64(bytes),
            HashType::Crc32 => {
                let mut hasher = Crc32::new();
                hasher.update(bytes);
                u64::from(hasher.finalize())
            }
        }
    }

    /// Bucket of `bytes` for a power-of-two `num_buckets`.
    ///
    /// Masking the low bits makes buckets nest: the bucket for `n` buckets is
    /// always the bucket for `2n` buckets modulo `n`.
    #[inline]
    pub fn bucket_of(&self, bytes: &[u8], num_buckets: u32) -> u32 {
        debug_assert!(num_buckets.is_power_of_two());
        (self.hash(bytes) & u64::from(num_buckets - 1)) as u32
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashType::Xxh3 => f.write_str("xxh3"),
            HashType::Crc32 => f.write_str("crc32"),
        }
    }
}

impl FromStr for HashType {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xxh3" => Ok(HashType::Xxh3),
            "crc32" => Ok(HashType::Crc32),
            _ => Err(MetadataError::UnknownIdentifier {
                kind: "hash type",
                value: s.to_string(),
            }),
        }
    }
}
