use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::key::KeyType;

/// Errors raised while building, validating, persisting or applying a
/// [`BucketMetadata`](crate::BucketMetadata).
#[derive(Debug, Error)]
pub enum MetadataError {
    /// `num_buckets` must be a power of two and at least 1.
    #[error("num_buckets must be a power of two >= 1, got {0}")]
    InvalidBucketCount(u32),

    /// `num_shards` must be at least 1.
    #[error("num_shards must be >= 1, got {0}")]
    InvalidShardCount(u32),

    /// The descriptor was written by a newer, unknown layout version.
    #[error("unsupported metadata version {found} (max supported {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// A key value could not be encoded as the dataset's key type.
    #[error("key field `{field}` holds {found}, expected {expected}")]
    KeyTypeMismatch {
        field: String,
        expected: KeyType,
        found: &'static str,
    },

    /// The key field exists but cannot be used as a key.
    #[error("key field `{field}` is not extractable: {reason}")]
    InvalidKey { field: String, reason: String },

    /// An identifier (hash, key type, order) was not recognised.
    #[error("unknown {kind} `{value}`")]
    UnknownIdentifier { kind: &'static str, value: String },

    /// The descriptor file could not be parsed.
    #[error("malformed metadata at {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An underlying I/O error while reading or writing the descriptor.
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl MetadataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MetadataError::Io {
            path: path.into(),
            source,
        }
    }
}
