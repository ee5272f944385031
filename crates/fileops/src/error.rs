use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by a [`FileOperations`](crate::FileOperations)
/// implementation.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The underlying storage failed or is unavailable.
    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed data was found while iterating a file. The iterator that
    /// produced it yields nothing afterwards.
    #[error("malformed record in {} at byte {offset}: {reason}", path.display())]
    Decode {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// A record could not be encoded for writing.
    #[error("cannot encode record for {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },
}

impl CodecError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CodecError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if the error is a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CodecError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Returns `true` for malformed-data errors.
    #[must_use]
    pub fn is_decode(&self) -> bool {
        matches!(self, CodecError::Decode { .. })
    }
}
