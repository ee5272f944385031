//! # BucketMetadata - Dataset Partitioning Descriptor
//!
//! Describes how a dataset was partitioned and sorted so that a reader can
//! reconstruct every data file path and merge datasets produced
//! independently.
//!
//! ## File Format
//!
//! The descriptor is a small JSON document stored next to the data files:
//!
//! ```text
//! {
//!   "version": 1,
//!   "numBuckets": 4,
//!   "numShards": 2,
//!   "keyType": "string",
//!   "keyField": "user_id",
//!   "keyOrder": "ascending",
//!   "hashType": "xxh3",
//!   "filenamePrefix": "bucket",
//!   "filenameSuffix": ".kv"
//! }
//! ```
//!
//! ## Publication
//!
//! The descriptor is written last in a write run, atomically (temp file,
//! fsync, rename, directory fsync). Its presence is the only signal that a
//! dataset is complete: [`BucketMetadata::load`] returns `None` for a
//! directory without one, whatever data files it holds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::bucket::{bucket_counts_compatible, source_buckets_for, BucketShardId};
use crate::hash::HashType;
use crate::key::{ExtractKey, Key, KeyOrder, KeyType};
use crate::MetadataError;

/// Layout version written by this crate. Descriptors with a higher version
/// are rejected on load.
pub const CURRENT_VERSION: u32 = 1;

/// Name of the descriptor file within a dataset directory.
pub const METADATA_FILENAME: &str = "metadata.json";

/// Temporary file used during the atomic descriptor write.
const METADATA_TMP_FILENAME: &str = "metadata.json.tmp";

/// Filename prefix used unless the caller picks another one.
pub const DEFAULT_FILENAME_PREFIX: &str = "bucket";

/// Partitioning scheme of one dataset.
///
/// Created once before a write run and never mutated after publication; a
/// rewrite produces a new dataset with its own descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetadata {
    version: u32,
    num_buckets: u32,
    num_shards: u32,
    key_type: KeyType,
    key_field: String,
    #[serde(default)]
    key_order: KeyOrder,
    hash_type: HashType,
    filename_prefix: String,
    #[serde(default)]
    filename_suffix: String,
}

/// The dimension along which two descriptors disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incompatibility {
    KeyType { left: KeyType, right: KeyType },
    KeyOrder { left: KeyOrder, right: KeyOrder },
    HashType { left: HashType, right: HashType },
    BucketCount { left: u32, right: u32 },
}

impl fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Incompatibility::KeyType { left, right } => {
                write!(f, "key type mismatch ({} vs {})", left, right)
            }
            Incompatibility::KeyOrder { left, right } => {
                write!(f, "key comparator mismatch ({} vs {})", left, right)
            }
            Incompatibility::HashType { left, right } => {
                write!(f, "hash algorithm mismatch ({} vs {})", left, right)
            }
            Incompatibility::BucketCount { left, right } => write!(
                f,
                "bucket counts {} and {} are not related by a power of two",
                left, right
            ),
        }
    }
}

impl BucketMetadata {
    /// Builds a validated descriptor with the default key order, filename
    /// prefix and an empty filename suffix.
    ///
    /// # Errors
    ///
    /// Returns an error if `num_buckets` is not a power of two or
    /// `num_shards` is zero.
    pub fn new(
        num_buckets: u32,
        num_shards: u32,
        key_type: KeyType,
        key_field: impl Into<String>,
        hash_type: HashType,
    ) -> Result<Self, MetadataError> {
        let metadata = Self {
            version: CURRENT_VERSION,
            num_buckets,
            num_shards,
            key_type,
            key_field: key_field.into(),
            key_order: KeyOrder::default(),
            hash_type,
            filename_prefix: DEFAULT_FILENAME_PREFIX.to_string(),
            filename_suffix: String::new(),
        };
        metadata.validate()?;
        Ok(metadata)
    }

    #[must_use]
    pub fn with_key_order(mut self, key_order: KeyOrder) -> Self {
        self.key_order = key_order;
        self
    }

    #[must_use]
    pub fn with_filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn with_filename_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.filename_suffix = suffix.into();
        self
    }

    /// Checks the structural invariants of the descriptor.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.version > CURRENT_VERSION {
            return Err(MetadataError::UnsupportedVersion {
                found: self.version,
                supported: CURRENT_VERSION,
            });
        }
        if !self.num_buckets.is_power_of_two() {
            return Err(MetadataError::InvalidBucketCount(self.num_buckets));
        }
        if self.num_shards == 0 {
            return Err(MetadataError::InvalidShardCount(self.num_shards));
        }
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn num_buckets(&self) -> u32 {
        self.num_buckets
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn key_order(&self) -> KeyOrder {
        self.key_order
    }

    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    pub fn filename_prefix(&self) -> &str {
        &self.filename_prefix
    }

    pub fn filename_suffix(&self) -> &str {
        &self.filename_suffix
    }

    // -------------------- compatibility --------------------

    /// Explains why `self` and `other` cannot be merge-joined, if they can't.
    ///
    /// Key fields and filename templates may differ; key types, comparators,
    /// hash algorithms and the power-of-two bucket ratio must agree.
    pub fn check_compatible(&self, other: &BucketMetadata) -> Result<(), Incompatibility> {
        if self.key_type != other.key_type {
            return Err(Incompatibility::KeyType {
                left: self.key_type,
                right: other.key_type,
            });
        }
        if self.key_order != other.key_order {
            return Err(Incompatibility::KeyOrder {
                left: self.key_order,
                right: other.key_order,
            });
        }
        if self.hash_type != other.hash_type {
            return Err(Incompatibility::HashType {
                left: self.hash_type,
                right: other.hash_type,
            });
        }
        if !bucket_counts_compatible(self.num_buckets, other.num_buckets) {
            return Err(Incompatibility::BucketCount {
                left: self.num_buckets,
                right: other.num_buckets,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn is_compatible_with(&self, other: &BucketMetadata) -> bool {
        self.check_compatible(other).is_ok()
    }

    /// This dataset's buckets that hold the keys of `target_bucket` for a
    /// read over `target_num_buckets` buckets.
    pub fn buckets_for(&self, target_bucket: u32, target_num_buckets: u32) -> Vec<u32> {
        source_buckets_for(target_bucket, target_num_buckets, self.num_buckets)
    }

    // -------------------- keys & placement --------------------

    /// Extracts and encodes the key of `record`.
    ///
    /// Returns `Ok(None)` for records that carry no key.
    pub fn extract_key<R: ExtractKey + ?Sized>(
        &self,
        record: &R,
    ) -> Result<Option<Key>, MetadataError> {
        match record.extract_key(&self.key_field)? {
            Some(value) => self.key_type.encode(&self.key_field, value).map(Some),
            None => Ok(None),
        }
    }

    /// Bucket of `key` in this dataset.
    #[inline]
    pub fn bucket_id(&self, key: &Key) -> u32 {
        self.hash_type.bucket_of(key.as_bytes(), self.num_buckets)
    }

    /// Bucket of `key` if the dataset had `num_buckets` buckets.
    #[inline]
    pub fn rehash_bucket(&self, key: &Key, num_buckets: u32) -> u32 {
        self.hash_type.bucket_of(key.as_bytes(), num_buckets)
    }

    /// Deterministic data file name for `id`.
    pub fn file_name(&self, id: BucketShardId) -> String {
        format!(
            "{}-{:05}-of-{:05}-shard-{:05}-of-{:05}{}",
            self.filename_prefix,
            id.bucket_id,
            self.num_buckets,
            id.shard_id,
            self.num_shards,
            self.filename_suffix
        )
    }

    /// File name holding the key-less records written by `shard_id`.
    pub fn null_keys_file_name(&self, shard_id: u32) -> String {
        format!(
            "{}-null-keys-shard-{:05}-of-{:05}{}",
            self.filename_prefix, shard_id, self.num_shards, self.filename_suffix
        )
    }

    /// Iterates every `BucketShardId` of the dataset in (bucket, shard) order.
    pub fn all_ids(&self) -> impl Iterator<Item = BucketShardId> + '_ {
        (0..self.num_buckets).flat_map(move |b| {
            (0..self.num_shards).map(move |s| BucketShardId::new(b, s))
        })
    }

    // -------------------- persistence --------------------

    /// Path of the descriptor inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(METADATA_FILENAME)
    }

    /// Returns `true` if `dir` holds a published descriptor.
    pub fn is_published(dir: &Path) -> bool {
        Self::path_in(dir).is_file()
    }

    /// Loads the descriptor of the dataset at `dir`.
    ///
    /// Returns `Ok(None)` when no descriptor exists, i.e. the dataset was
    /// never published.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be read, parsed, or fails
    /// validation.
    pub fn load(dir: &Path) -> Result<Option<Self>, MetadataError> {
        let path = Self::path_in(dir);
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MetadataError::io(path, e)),
        };

        let metadata: BucketMetadata = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| MetadataError::Malformed {
                path: path.clone(),
                source,
            })?;
        metadata.validate()?;

        debug!(path = %path.display(), num_buckets = metadata.num_buckets, "loaded bucket metadata");
        Ok(Some(metadata))
    }

    /// Persists the descriptor into `dir` atomically.
    ///
    /// Writes `metadata.json.tmp`, fsyncs it, renames it over
    /// `metadata.json` and fsyncs the directory so the rename is durable.
    pub fn save(&self, dir: &Path) -> Result<(), MetadataError> {
        self.validate()?;
        let path = Self::path_in(dir);
        let tmp_path = dir.join(METADATA_TMP_FILENAME);

        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| MetadataError::io(&tmp_path, e))?;

            serde_json::to_writer_pretty(&mut f, self).map_err(|source| {
                MetadataError::Malformed {
                    path: tmp_path.clone(),
                    source,
                }
            })?;
            f.write_all(b"\n")
                .and_then(|_| f.flush())
                .and_then(|_| f.sync_all())
                .map_err(|e| MetadataError::io(&tmp_path, e))?;
        }

        fs::rename(&tmp_path, &path).map_err(|e| MetadataError::io(&path, e))?;

        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }

        debug!(path = %path.display(), "published bucket metadata");
        Ok(())
    }
}
