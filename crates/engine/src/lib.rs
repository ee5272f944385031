//! # Engine - Sort-Merge-Bucket Writer and Merge-Join Reader
//!
//! Ties the [`metadata`] model and the [`fileops`] codecs together into the
//! two halves of a sort-merge-bucket (SMB) join: writing pre-partitioned,
//! pre-sorted datasets, and joining several of them by streaming merge.
//!
//! ## Architecture
//!
//! ```text
//! records
//!   |
//!   v
//! ┌─────────────────────────────────────────────────────────┐
//! │                        WRITE                            │
//! │                                                         │
//! │ ShardWriter → hash(key) & (buckets-1) → SortBuffer      │
//! │                                  |  (full?) spill run   │
//! │ finish()   → sort / merge runs → staged files (temp dir)│
//! │ commit()   → rename into dataset → metadata.json LAST   │
//! └─────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────┐
//! │                        READ                             │
//! │                                                         │
//! │ open()        → load descriptors → pairwise compatible? │
//! │ read_bucket() → per source: merge shard files           │
//! │               → across sources: co-group by key         │
//! │ iter()        → merge all buckets in key order          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module      | Purpose                                                   |
//! |-------------|-----------------------------------------------------------|
//! | [`write`]   | `WriteRun`, `ShardWriter`, staging and publication        |
//! | [`read`]    | `SortedBucketSource`, source validation, bucket resolution|
//! | [`merge`]   | k-way merges, co-grouping, join modes                     |
//! | `buffer`    | bounded per-bucket sort buffer with spill-to-disk         |
//! | [`cleanup`] | removal of abandoned `.smb-tmp-*` staging directories     |
//! | [`error`]   | `SmbError` and the four-way `ErrorKind` taxonomy          |
//!
//! ## Publication
//!
//! The presence of `metadata.json` is the only signal that a dataset is
//! complete. It is written last, after every data file has been renamed into
//! place, so a reader either sees a whole dataset or rejects it as
//! unpublished.

mod buffer;
pub mod cleanup;
pub mod error;
pub mod merge;
pub mod read;
pub mod write;

pub use cleanup::{cleanup_stale_runs, TEMP_DIR_PREFIX};
pub use error::{ErrorKind, Result, SmbError};
pub use merge::{CoGroup, CoGroupIterator, JoinMode, SortedCoGroups};
pub use read::{load_published, BucketedInput, SortedBucketSource, TargetParallelism};
pub use write::{
    write_all, PublishedDataset, ShardWriter, StagedFile, StagedShards, WriteOptions, WriteRun,
    WriteState,
};

#[cfg(test)]
mod tests;
