//! # Metadata - Bucketed Dataset Descriptors
//!
//! Defines the partitioning contract shared by writers and readers of
//! sort-merge-bucket datasets:
//!
//! - [`BucketMetadata`]: bucket/shard counts, key type, key field, key order,
//!   hash algorithm and file naming template, persisted as `metadata.json`.
//! - [`KeyType`] / [`Key`]: order-preserving key encoding.
//! - [`HashType`]: deterministic hashing of encoded keys.
//! - [`bucket`]: the pure refinement rule mapping a target bucket onto the
//!   buckets of a coarser or finer dataset.
//!
//! ## Dataset Layout
//!
//! ```text
//! <dataset>/
//!   metadata.json
//!   bucket-00000-of-00004-shard-00000-of-00002.kv
//!   bucket-00000-of-00004-shard-00001-of-00002.kv
//!   ...
//!   bucket-00003-of-00004-shard-00001-of-00002.kv
//!   bucket-null-keys-shard-00000-of-00002.kv      (only if key-less records exist)
//! ```

pub mod bucket;
mod error;
mod hash;
mod key;
mod metadata;

pub use bucket::BucketShardId;
pub use error::MetadataError;
pub use hash::HashType;
pub use key::{ExtractKey, Key, KeyOrder, KeyType, KeyValue};
pub use metadata::{
    BucketMetadata, Incompatibility, CURRENT_VERSION, DEFAULT_FILENAME_PREFIX, METADATA_FILENAME,
};

#[cfg(test)]
mod tests;
