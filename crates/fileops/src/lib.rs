//! # FileOperations - Per-Format Record Codecs
//!
//! The bucketed engine never touches bytes on disk directly. Every dataset
//! format supplies one [`FileOperations`] implementation with two
//! capabilities:
//!
//! - [`create_writer`](FileOperations::create_writer): a [`RecordWriter`]
//!   that appends records to a destination and is closed exactly once.
//! - [`iterator`](FileOperations::iterator): a lazy, single-pass
//!   [`RecordIterator`] over a source file, with optional column
//!   [`Projection`] and row [`Predicate`] applied while decoding.
//!
//! Two formats ship with the crate:
//!
//! | Format | Record        | Extension | Module   |
//! |--------|---------------|-----------|----------|
//! | kv     | [`KvRecord`]  | `.kv`     | [`kv`]   |
//! | json   | [`JsonRecord`]| `.json`   | [`json`] |
//!
//! A decode failure ends the iterator: the `Err` item is the last one it
//! yields.

mod error;
pub mod json;
pub mod kv;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub use error::CodecError;
pub use json::{JsonFileOperations, JsonRecord, JSON_EXTENSION};
pub use kv::{KvFileOperations, KvRecord, KV_EXTENSION};

/// Appends records to one destination file.
///
/// Dropping a writer without calling [`close`](RecordWriter::close) releases
/// the file handle but leaves the file incomplete, which is only acceptable
/// on error paths where the file is discarded.
pub trait RecordWriter<R>: Send {
    fn write(&mut self, record: &R) -> Result<(), CodecError>;

    /// Flushes buffered data, makes it durable and releases the file.
    fn close(self: Box<Self>) -> Result<(), CodecError>;
}

/// Lazy, finite, single-pass sequence of decoded records.
pub type RecordIterator<R> = Box<dyn Iterator<Item = Result<R, CodecError>> + Send>;

/// Row filter evaluated on each (projected) record during decoding.
pub type Predicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// Field names to retain while decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<String>,
}

impl Projection {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Returns `true` if the top-level `field` is kept: it is projected
    /// itself or is the first segment of a projected dotted path, so
    /// `"user.id"` keeps `user`.
    pub fn covers(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.split('.').next() == Some(field))
    }

    /// Adds `field` unless it is already projected.
    #[must_use]
    pub fn with_field(mut self, field: &str) -> Self {
        if !self.contains(field) {
            self.fields.push(field.to_string());
        }
        self
    }
}

/// Optional projection and predicate pushed into a format's decoder.
pub struct ReadOptions<R> {
    pub projection: Option<Projection>,
    pub predicate: Option<Predicate<R>>,
}

impl<R> ReadOptions<R> {
    pub fn new() -> Self {
        Self {
            projection: None,
            predicate: None,
        }
    }

    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Returns `true` if `record` passes the predicate (or there is none).
    #[inline]
    pub fn accepts(&self, record: &R) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(record))
    }
}

impl<R> Default for ReadOptions<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for ReadOptions<R> {
    fn clone(&self) -> Self {
        Self {
            projection: self.projection.clone(),
            predicate: self.predicate.clone(),
        }
    }
}

impl<R> fmt::Debug for ReadOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("projection", &self.projection)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Codec for one file format.
///
/// Implementations are stateless with respect to individual files and are
/// shared between parallel write and read units.
pub trait FileOperations: Send + Sync {
    type Record: Send + 'static;

    /// File extension including the leading dot, e.g. `".kv"`.
    fn extension(&self) -> &str;

    /// Creates (or truncates) `path` and returns a writer for it.
    fn create_writer(
        &self,
        path: &Path,
    ) -> Result<Box<dyn RecordWriter<Self::Record>>, CodecError>;

    /// Opens `path` for lazy iteration.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Io`] if the file cannot be opened; errors found
    /// while decoding are yielded by the iterator itself.
    fn iterator(
        &self,
        path: &Path,
        options: &ReadOptions<Self::Record>,
    ) -> Result<RecordIterator<Self::Record>, CodecError>;
}

/// Formats selectable by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormatKind {
    #[default]
    Kv,
    Json,
}

impl FormatKind {
    pub fn extension(&self) -> &'static str {
        match self {
            FormatKind::Kv => KV_EXTENSION,
            FormatKind::Json => JSON_EXTENSION,
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatKind::Kv => f.write_str("kv"),
            FormatKind::Json => f.write_str("json"),
        }
    }
}

impl FromStr for FormatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kv" => Ok(FormatKind::Kv),
            "json" | "ndjson" => Ok(FormatKind::Json),
            other => Err(format!("unknown format `{}`", other)),
        }
    }
}
