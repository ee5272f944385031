//! Error taxonomy of the engine.
//!
//! Every [`SmbError`] maps onto one [`ErrorKind`]:
//!
//! | Kind          | Raised when                                                   |
//! |---------------|---------------------------------------------------------------|
//! | Configuration | sources disagree, a dataset is unpublished, options are bad   |
//! | Commit        | anything fails in a write run before the descriptor is saved  |
//! | Decode        | a data file holds a malformed or misplaced record             |
//! | Resource      | storage is unavailable outside a write run                    |

use fileops::CodecError;
use metadata::{BucketShardId, Incompatibility, MetadataError, METADATA_FILENAME};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::write::WriteState;

/// Coarse classification of an [`SmbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Commit,
    Decode,
    Resource,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Commit => "commit failure",
            ErrorKind::Decode => "decode failure",
            ErrorKind::Resource => "resource failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SmbError {
    /// Two sources of one merge-join cannot be joined.
    #[error("incompatible sources {} and {}: {dimension}", .left.display(), .right.display())]
    Incompatible {
        left: PathBuf,
        right: PathBuf,
        dimension: Incompatibility,
    },

    /// The dataset has no descriptor and must be treated as non-existent.
    #[error("dataset at {} is not published (missing {})", .path.display(), METADATA_FILENAME)]
    Unpublished { path: PathBuf },

    /// A write run targeted a location that already holds a published dataset.
    #[error("dataset at {} is already published", .path.display())]
    AlreadyPublished { path: PathBuf },

    /// The descriptor exists but cannot be used.
    #[error("invalid metadata for {}: {source}", .path.display())]
    InvalidMetadata {
        path: PathBuf,
        #[source]
        source: MetadataError,
    },

    /// Caller-supplied options are inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation was attempted in a write state that does not allow it.
    #[error("write run is {state}, cannot {action}")]
    InvalidState {
        state: WriteState,
        action: &'static str,
    },

    /// A write run failed before publication; the dataset stays unpublished.
    #[error("commit of {} failed{}: {source}", .path.display(), bucket_suffix(.bucket))]
    Commit {
        path: PathBuf,
        bucket: Option<BucketShardId>,
        #[source]
        source: Box<SmbError>,
    },

    /// The merge stopped at `key` because one of its inputs failed; `None`
    /// means it failed before reaching any key.
    #[error("merge failed in bucket {bucket}{}: {source}", key_suffix(.key))]
    Merge {
        bucket: u32,
        key: Option<String>,
        #[source]
        source: Box<SmbError>,
    },

    /// A sorted input yielded a key smaller than its predecessor.
    #[error("input not sorted: key {next} follows {previous}")]
    OutOfOrder { previous: String, next: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A record's key could not be extracted or encoded.
    #[error("key error: {0}")]
    Key(#[from] MetadataError),

    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn bucket_suffix(bucket: &Option<BucketShardId>) -> String {
    match bucket {
        Some(id) => format!(" at {}", id),
        None => String::new(),
    }
}

fn key_suffix(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(" at key {}", key),
        None => " before the first key".to_string(),
    }
}

impl SmbError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SmbError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn commit(
        path: impl Into<PathBuf>,
        bucket: Option<BucketShardId>,
        source: impl Into<SmbError>,
    ) -> Self {
        SmbError::Commit {
            path: path.into(),
            bucket,
            source: Box::new(source.into()),
        }
    }

    /// Classifies the error according to the engine's failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SmbError::Incompatible { .. }
            | SmbError::Unpublished { .. }
            | SmbError::AlreadyPublished { .. }
            | SmbError::InvalidMetadata { .. }
            | SmbError::InvalidConfig(_)
            | SmbError::InvalidState { .. } => ErrorKind::Configuration,
            SmbError::Commit { .. } => ErrorKind::Commit,
            SmbError::Merge { source, .. } => source.kind(),
            SmbError::OutOfOrder { .. } | SmbError::Key(_) => ErrorKind::Decode,
            SmbError::Codec(CodecError::Io { .. }) | SmbError::Io { .. } => ErrorKind::Resource,
            SmbError::Codec(_) => ErrorKind::Decode,
        }
    }
}

pub type Result<T> = std::result::Result<T, SmbError>;
