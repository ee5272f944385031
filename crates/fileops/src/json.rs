//! Newline-delimited JSON record files.
//!
//! Each record is one JSON object on its own line. Keys are looked up by
//! dotted path (`"user.id"`). Projection retains top-level fields, keeping the
//! first segment of any projected dotted path.

use metadata::{ExtractKey, KeyValue, MetadataError};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::{
    CodecError, FileOperations, Predicate, Projection, ReadOptions, RecordIterator, RecordWriter,
};

/// Extension of JSON data files.
pub const JSON_EXTENSION: &str = ".json";

/// A JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRecord(pub Value);

impl JsonRecord {
    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Looks up a dotted field path.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.0, |node, segment| node.get(segment))
    }
}

impl From<Value> for JsonRecord {
    fn from(value: Value) -> Self {
        JsonRecord(value)
    }
}

impl ExtractKey for JsonRecord {
    fn extract_key(&self, field: &str) -> Result<Option<KeyValue>, MetadataError> {
        let invalid = |reason: &str| MetadataError::InvalidKey {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        match self.get_path(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(KeyValue::Str(s.clone()))),
            Some(Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    Ok(Some(KeyValue::Int(i)))
                } else if let Some(u) = n.as_u64() {
                    Ok(Some(KeyValue::UInt(u)))
                } else {
                    Err(invalid("floating point numbers cannot be keys"))
                }
            }
            Some(Value::Bool(_)) => Err(invalid("booleans cannot be keys")),
            Some(Value::Array(_)) | Some(Value::Object(_)) => {
                Err(invalid("nested values cannot be keys"))
            }
        }
    }
}

/// [`FileOperations`] for newline-delimited [`JsonRecord`] files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileOperations;

impl FileOperations for JsonFileOperations {
    type Record = JsonRecord;

    fn extension(&self) -> &str {
        JSON_EXTENSION
    }

    fn create_writer(
        &self,
        path: &Path,
    ) -> Result<Box<dyn RecordWriter<JsonRecord>>, CodecError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| CodecError::io(path, e))?;

        Ok(Box::new(JsonWriter {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        }))
    }

    fn iterator(
        &self,
        path: &Path,
        options: &ReadOptions<JsonRecord>,
    ) -> Result<RecordIterator<JsonRecord>, CodecError> {
        let file = File::open(path).map_err(|e| CodecError::io(path, e))?;
        Ok(Box::new(JsonIterator {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            line: Vec::new(),
            offset: 0,
            projection: options.projection.clone(),
            predicate: options.predicate.clone(),
            done: false,
        }))
    }
}

struct JsonWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl RecordWriter<JsonRecord> for JsonWriter {
    fn write(&mut self, record: &JsonRecord) -> Result<(), CodecError> {
        if !record.0.is_object() {
            return Err(CodecError::Encode {
                path: self.path.clone(),
                reason: "json records must be objects".to_string(),
            });
        }
        serde_json::to_writer(&mut self.file, &record.0).map_err(|e| CodecError::Encode {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        self.file
            .write_all(b"\n")
            .map_err(|e| CodecError::io(&self.path, e))
    }

    fn close(self: Box<Self>) -> Result<(), CodecError> {
        let JsonWriter { path, mut file } = *self;
        file.flush().map_err(|e| CodecError::io(&path, e))?;
        let inner = file
            .into_inner()
            .map_err(|e| CodecError::io(&path, e.into_error()))?;
        inner.sync_all().map_err(|e| CodecError::io(&path, e))
    }
}

struct JsonIterator {
    path: PathBuf,
    reader: BufReader<File>,
    line: Vec<u8>,
    /// Byte offset of the current line, for error messages.
    offset: u64,
    projection: Option<Projection>,
    predicate: Option<Predicate<JsonRecord>>,
    done: bool,
}

impl JsonIterator {
    fn read_record(&mut self) -> Result<Option<JsonRecord>, CodecError> {
        loop {
            self.line.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut self.line)
                .map_err(|e| CodecError::io(&self.path, e))?;
            if n == 0 {
                return Ok(None);
            }
            let line_offset = self.offset;
            self.offset += n as u64;

            if self.line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            // Bytes, not `read_line`: invalid UTF-8 is malformed data, not an
            // I/O failure.
            let mut value: Value =
                serde_json::from_slice(&self.line).map_err(|e| CodecError::Decode {
                    path: self.path.clone(),
                    offset: line_offset,
                    reason: e.to_string(),
                })?;

            match (&mut value, &self.projection) {
                (Value::Object(map), Some(projection)) => {
                    map.retain(|field, _| projection.covers(field));
                }
                (Value::Object(_), None) => {}
                _ => {
                    return Err(CodecError::Decode {
                        path: self.path.clone(),
                        offset: line_offset,
                        reason: "expected a json object".to_string(),
                    })
                }
            }

            return Ok(Some(JsonRecord(value)));
        }
    }
}

impl Iterator for JsonIterator {
    type Item = Result<JsonRecord, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.read_record() {
                Ok(Some(record)) => {
                    if self.predicate.as_ref().map_or(true, |p| p(&record)) {
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
