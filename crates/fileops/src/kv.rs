//! Binary key/value record files.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ RECORDS (in write order)                                      │
//! │                                                               │
//! │ key_len (u32) | key | val_len (u32) | val | crc32 (u32)       │
//! │                                                               │
//! │ The CRC32 covers key_len through the end of val.              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ TRAILER                                                       │
//! │                                                               │
//! │ end_marker (u32 = 0xFFFF_FFFF) | record_count (u64)           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The end marker can never be a valid
//! `key_len` (it exceeds [`MAX_KEY_BYTES`]), so a file that ends without a
//! trailer is reported as truncated rather than silently accepted.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use metadata::{ExtractKey, KeyValue, MetadataError};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::{CodecError, FileOperations, Predicate, ReadOptions, RecordIterator, RecordWriter};

/// Extension of kv data files.
pub const KV_EXTENSION: &str = ".kv";

/// Maximum key size accepted on write and read (64 KiB).
pub const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size accepted on write and read (10 MiB).
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

const END_MARKER: u32 = 0xFFFF_FFFF;

/// Projectable field names of a [`KvRecord`].
pub const KEY_FIELD: &str = "key";
pub const VALUE_FIELD: &str = "value";

/// A raw key/value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KvRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KvRecord {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl ExtractKey for KvRecord {
    fn extract_key(&self, field: &str) -> Result<Option<KeyValue>, MetadataError> {
        match field {
            KEY_FIELD => Ok(Some(KeyValue::Bytes(self.key.clone()))),
            VALUE_FIELD => Ok(Some(KeyValue::Bytes(self.value.clone()))),
            other => Err(MetadataError::InvalidKey {
                field: other.to_string(),
                reason: "kv records only have `key` and `value` fields".to_string(),
            }),
        }
    }
}

/// [`FileOperations`] for [`KvRecord`] files.
#[derive(Debug, Clone, Copy, Default)]
pub struct KvFileOperations;

impl FileOperations for KvFileOperations {
    type Record = KvRecord;

    fn extension(&self) -> &str {
        KV_EXTENSION
    }

    fn create_writer(&self, path: &Path) -> Result<Box<dyn RecordWriter<KvRecord>>, CodecError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| CodecError::io(path, e))?;

        Ok(Box::new(KvWriter {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
            count: 0,
            buf: Vec::with_capacity(256),
        }))
    }

    fn iterator(
        &self,
        path: &Path,
        options: &ReadOptions<KvRecord>,
    ) -> Result<RecordIterator<KvRecord>, CodecError> {
        let file = File::open(path).map_err(|e| CodecError::io(path, e))?;
        let keep_value = options
            .projection
            .as_ref()
            .map_or(true, |p| p.contains(VALUE_FIELD));

        Ok(Box::new(KvIterator {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset: 0,
            count: 0,
            keep_value,
            predicate: options.predicate.clone(),
            scratch: Vec::new(),
            done: false,
        }))
    }
}

struct KvWriter {
    path: PathBuf,
    file: BufWriter<File>,
    count: u64,
    /// Reusable record buffer, checksummed before each write.
    buf: Vec<u8>,
}

impl RecordWriter<KvRecord> for KvWriter {
    fn write(&mut self, record: &KvRecord) -> Result<(), CodecError> {
        if record.key.len() > MAX_KEY_BYTES {
            return Err(CodecError::Encode {
                path: self.path.clone(),
                reason: format!("key too large: {} bytes (max {})", record.key.len(), MAX_KEY_BYTES),
            });
        }
        if record.value.len() > MAX_VALUE_BYTES {
            return Err(CodecError::Encode {
                path: self.path.clone(),
                reason: format!(
                    "value too large: {} bytes (max {})",
                    record.value.len(),
                    MAX_VALUE_BYTES
                ),
            });
        }

        self.buf.clear();
        // Writes into a Vec cannot fail.
        let _ = self.buf.write_u32::<LittleEndian>(record.key.len() as u32);
        self.buf.extend_from_slice(&record.key);
        let _ = self.buf.write_u32::<LittleEndian>(record.value.len() as u32);
        self.buf.extend_from_slice(&record.value);

        let mut hasher = Crc32::new();
        hasher.update(&self.buf);
        let crc = hasher.finalize();

        self.file
            .write_all(&self.buf)
            .and_then(|_| self.file.write_u32::<LittleEndian>(crc))
            .map_err(|e| CodecError::io(&self.path, e))?;
        self.count += 1;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), CodecError> {
        let KvWriter {
            path,
            mut file,
            count,
            ..
        } = *self;

        file.write_u32::<LittleEndian>(END_MARKER)
            .and_then(|_| file.write_u64::<LittleEndian>(count))
            .and_then(|_| file.flush())
            .map_err(|e| CodecError::io(&path, e))?;
        let inner = file
            .into_inner()
            .map_err(|e| CodecError::io(&path, e.into_error()))?;
        inner.sync_all().map_err(|e| CodecError::io(&path, e))?;
        Ok(())
    }
}

struct KvIterator {
    path: PathBuf,
    reader: BufReader<File>,
    /// Byte offset of the next unread record, for error messages.
    offset: u64,
    count: u64,
    keep_value: bool,
    predicate: Option<Predicate<KvRecord>>,
    /// Holds value bytes that are checksummed but projected away.
    scratch: Vec<u8>,
    done: bool,
}

impl KvIterator {
    fn corrupt(&self, reason: impl Into<String>) -> CodecError {
        CodecError::Decode {
            path: self.path.clone(),
            offset: self.offset,
            reason: reason.into(),
        }
    }

    fn map_read_err(&self, e: io::Error) -> CodecError {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            self.corrupt("truncated file (missing record bytes or trailer)")
        } else {
            CodecError::io(&self.path, e)
        }
    }

    /// Reads the next record, or `None` once the trailer has been verified.
    fn read_record(&mut self) -> Result<Option<KvRecord>, CodecError> {
        let key_len = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| self.map_read_err(e))?;

        if key_len == END_MARKER {
            let expected = self
                .reader
                .read_u64::<LittleEndian>()
                .map_err(|e| self.map_read_err(e))?;
            if expected != self.count {
                return Err(self.corrupt(format!(
                    "trailer says {} records, read {}",
                    expected, self.count
                )));
            }
            let mut rest = [0u8; 1];
            let extra = self
                .reader
                .read(&mut rest)
                .map_err(|e| CodecError::io(&self.path, e))?;
            if extra != 0 {
                return Err(self.corrupt("trailing bytes after trailer"));
            }
            return Ok(None);
        }

        let key_len = key_len as usize;
        if key_len > MAX_KEY_BYTES {
            return Err(self.corrupt(format!(
                "key_len {} exceeds maximum {}",
                key_len, MAX_KEY_BYTES
            )));
        }
        let mut key = vec![0u8; key_len];
        self.reader
            .read_exact(&mut key)
            .map_err(|e| self.map_read_err(e))?;

        let val_len = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| self.map_read_err(e))? as usize;
        if val_len > MAX_VALUE_BYTES {
            return Err(self.corrupt(format!(
                "val_len {} exceeds maximum {}",
                val_len, MAX_VALUE_BYTES
            )));
        }

        let mut value = Vec::new();
        {
            let target = if self.keep_value {
                &mut value
            } else {
                &mut self.scratch
            };
            target.resize(val_len, 0);
            let res = self.reader.read_exact(target);
            if let Err(e) = res {
                return Err(self.map_read_err(e));
            }
        }

        let stored_crc = self
            .reader
            .read_u32::<LittleEndian>()
            .map_err(|e| self.map_read_err(e))?;

        let mut hasher = Crc32::new();
        hasher.update(&(key_len as u32).to_le_bytes());
        hasher.update(&key);
        hasher.update(&(val_len as u32).to_le_bytes());
        hasher.update(if self.keep_value { &value } else { &self.scratch });
        let actual_crc = hasher.finalize();
        if actual_crc != stored_crc {
            return Err(self.corrupt(format!(
                "CRC32 mismatch: expected {:#010x}, got {:#010x}",
                stored_crc, actual_crc
            )));
        }

        self.offset += (4 + key_len + 4 + val_len + 4) as u64;
        self.count += 1;
        Ok(Some(KvRecord { key, value }))
    }
}

impl Iterator for KvIterator {
    type Item = Result<KvRecord, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.read_record() {
                Ok(Some(record)) => {
                    let accepted = self.predicate.as_ref().map_or(true, |p| p(&record));
                    if accepted {
                        return Some(Ok(record));
                    }
                }
                Ok(None) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
