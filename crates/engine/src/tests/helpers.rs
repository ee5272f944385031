use fileops::{
    CodecError, FileOperations, JsonFileOperations, JsonRecord, KvFileOperations, KvRecord,
    ReadOptions, RecordIterator, RecordWriter,
};
use metadata::{BucketMetadata, HashType, KeyType};
use serde_json::json;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{write_all, CoGroup, PublishedDataset, WriteOptions};

pub fn kv_ops() -> Arc<dyn FileOperations<Record = KvRecord>> {
    Arc::new(KvFileOperations)
}

pub fn json_ops() -> Arc<dyn FileOperations<Record = JsonRecord>> {
    Arc::new(JsonFileOperations)
}

/// String-keyed kv dataset descriptor.
pub fn kv_meta(num_buckets: u32, num_shards: u32) -> BucketMetadata {
    BucketMetadata::new(num_buckets, num_shards, KeyType::String, "key", HashType::Xxh3).unwrap()
}

/// Int64-keyed json dataset descriptor, keyed on `id`.
pub fn json_meta(num_buckets: u32) -> BucketMetadata {
    BucketMetadata::new(num_buckets, 1, KeyType::Int64, "id", HashType::Xxh3).unwrap()
}

pub fn kv(key: &str, value: &str) -> KvRecord {
    KvRecord::new(key.as_bytes(), value.as_bytes())
}

pub fn row(id: i64, v: &str) -> JsonRecord {
    JsonRecord(json!({ "id": id, "v": v }))
}

pub fn write_kv(dir: &Path, meta: BucketMetadata, records: Vec<KvRecord>) -> PublishedDataset {
    write_all(dir, meta, kv_ops(), WriteOptions::default(), records).unwrap()
}

pub fn write_json(dir: &Path, meta: BucketMetadata, records: Vec<JsonRecord>) -> PublishedDataset {
    write_all(dir, meta, json_ops(), WriteOptions::default(), records).unwrap()
}

/// Decodes a co-group's key as an Int64.
pub fn int_key(group: &CoGroup<JsonRecord>) -> i64 {
    match KeyType::Int64.decode(&group.key) {
        Some(metadata::KeyValue::Int(i)) => i,
        other => panic!("not an int64 key: {:?}", other),
    }
}

/// The `v` fields of one source's group.
pub fn values(group: &CoGroup<JsonRecord>, source: usize) -> Vec<String> {
    group
        .group(source)
        .iter()
        .map(|r| r.0["v"].as_str().unwrap_or_default().to_string())
        .collect()
}

/// Entries of `dir`, sorted, hidden staging directories included.
pub fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Wraps a format and fails the `fail_on`-th (1-based) `create_writer` call.
pub struct FailingOps<R> {
    inner: Arc<dyn FileOperations<Record = R>>,
    fail_on: usize,
    calls: AtomicUsize,
}

impl<R> FailingOps<R> {
    pub fn new(inner: Arc<dyn FileOperations<Record = R>>, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }
}

impl<R: Send + 'static> FileOperations for FailingOps<R> {
    type Record = R;

    fn extension(&self) -> &str {
        self.inner.extension()
    }

    fn create_writer(&self, path: &Path) -> Result<Box<dyn RecordWriter<R>>, CodecError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(CodecError::Io {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::Other, "injected failure"),
            });
        }
        self.inner.create_writer(path)
    }

    fn iterator(&self, path: &Path, options: &ReadOptions<R>) -> Result<RecordIterator<R>, CodecError> {
        self.inner.iterator(path, options)
    }
}
