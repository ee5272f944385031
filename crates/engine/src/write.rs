//! Write path: bucketing, per-bucket sorting, staging and atomic publication.
//!
//! A [`WriteRun`] moves through these states:
//!
//! ```text
//! Open ──shard_writer()──> Writing ──commit()──> Committing ──> Published
//!   │                        │                       │
//!   └──────── abort() ───────┴──── any error ────────┴────────> Failed
//! ```
//!
//! Each [`ShardWriter`] owns a disjoint range of shard ids, so writers can run
//! on separate threads without coordinating. Finishing a writer (state
//! `Sorting`) sorts its buckets and stages the files inside the run's temp
//! directory. Commit renames every staged file into the dataset directory,
//! creates empty files for ids nobody wrote, and saves the descriptor last.
//! Until that final step the dataset is unpublished, and on failure every
//! file the run produced is removed again.

use fileops::{FileOperations, RecordWriter};
use metadata::{BucketMetadata, BucketShardId, ExtractKey};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::buffer::SortBuffer;
use crate::cleanup::TEMP_DIR_PREFIX;
use crate::error::{Result, SmbError};

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Lifecycle state of a write run or one of its shard writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Open,
    Writing,
    Sorting,
    Committing,
    Published,
    Failed,
}

impl fmt::Display for WriteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriteState::Open => "open",
            WriteState::Writing => "writing",
            WriteState::Sorting => "sorting",
            WriteState::Committing => "committing",
            WriteState::Published => "published",
            WriteState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tunables of a write run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Records held in memory per (bucket, shard) before spilling to disk.
    pub sort_buffer_records: usize,
    /// Overrides the descriptor's data file prefix when set.
    pub filename_prefix: Option<String>,
}

impl WriteOptions {
    #[must_use]
    pub fn with_sort_buffer_records(mut self, records: usize) -> Self {
        self.sort_buffer_records = records;
        self
    }

    #[must_use]
    pub fn with_filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = Some(prefix.into());
        self
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            sort_buffer_records: config::DEFAULT_SORT_BUFFER_RECORDS,
            filename_prefix: None,
        }
    }
}

impl From<&config::Config> for WriteOptions {
    fn from(cfg: &config::Config) -> Self {
        Self {
            sort_buffer_records: cfg.sort_buffer_records,
            filename_prefix: None,
        }
    }
}

/// Summary of a successfully published dataset.
#[derive(Debug, Clone)]
pub struct PublishedDataset {
    pub path: PathBuf,
    pub metadata: BucketMetadata,
    /// Records written to bucket files.
    pub records: u64,
    /// Records written to null-key files.
    pub null_key_records: u64,
    /// Data files in the dataset, empty ones included.
    pub files: usize,
}

/// A finished file waiting in the run's temp directory.
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// `None` for a null-key file.
    pub id: Option<BucketShardId>,
    pub name: String,
    pub temp_path: PathBuf,
    pub records: u64,
}

/// Output of one [`ShardWriter`], handed back to [`WriteRun::commit`].
#[derive(Debug)]
pub struct StagedShards {
    temp_dir: PathBuf,
    shards: Range<u32>,
    files: Vec<StagedFile>,
}

impl StagedShards {
    pub fn shards(&self) -> Range<u32> {
        self.shards.clone()
    }

    pub fn files(&self) -> &[StagedFile] {
        &self.files
    }
}

/// Coordinates one attempt to publish a bucketed dataset.
pub struct WriteRun<R> {
    path: PathBuf,
    temp_dir: PathBuf,
    metadata: Arc<BucketMetadata>,
    ops: Arc<dyn FileOperations<Record = R>>,
    sort_buffer_records: usize,
    state: WriteState,
    claimed: Vec<Range<u32>>,
}

impl<R> WriteRun<R>
where
    R: ExtractKey + Send + 'static,
{
    /// Starts a write run targeting `path`.
    ///
    /// The descriptor's filename suffix is taken from `ops`. Writing into a
    /// directory that already holds a published dataset is refused.
    pub fn open(
        path: impl Into<PathBuf>,
        metadata: BucketMetadata,
        ops: Arc<dyn FileOperations<Record = R>>,
        options: WriteOptions,
    ) -> Result<Self> {
        let path = path.into();
        let mut metadata = metadata.with_filename_suffix(ops.extension());
        if let Some(prefix) = &options.filename_prefix {
            metadata = metadata.with_filename_prefix(prefix.as_str());
        }
        metadata
            .validate()
            .map_err(|source| SmbError::InvalidMetadata {
                path: path.clone(),
                source,
            })?;
        if options.sort_buffer_records == 0 {
            return Err(SmbError::InvalidConfig(
                "sort buffer must hold at least one record".to_string(),
            ));
        }
        if BucketMetadata::is_published(&path) {
            return Err(SmbError::AlreadyPublished { path });
        }

        fs::create_dir_all(&path)
            .map_err(|e| SmbError::commit(&path, None, SmbError::io(&path, e)))?;

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let temp_dir = path.join(format!(
            "{}{}-{}-{}",
            TEMP_DIR_PREFIX,
            ts,
            std::process::id(),
            RUN_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir(&temp_dir)
            .map_err(|e| SmbError::commit(&path, None, SmbError::io(&temp_dir, e)))?;

        debug!(
            path = %path.display(),
            buckets = metadata.num_buckets(),
            shards = metadata.num_shards(),
            "opened write run"
        );

        Ok(Self {
            path,
            temp_dir,
            metadata: Arc::new(metadata),
            ops,
            sort_buffer_records: options.sort_buffer_records,
            state: WriteState::Open,
            claimed: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &BucketMetadata {
        &self.metadata
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    /// Creates a writer owning the shard ids in `shards`.
    ///
    /// Ranges must be non-empty, lie within the dataset's shard count and not
    /// overlap any range handed out before.
    pub fn shard_writer(&mut self, shards: Range<u32>) -> Result<ShardWriter<R>> {
        if !matches!(self.state, WriteState::Open | WriteState::Writing) {
            return Err(SmbError::InvalidState {
                state: self.state,
                action: "create a shard writer",
            });
        }
        if shards.is_empty() || shards.end > self.metadata.num_shards() {
            return Err(SmbError::InvalidConfig(format!(
                "shard range {:?} is outside 0..{}",
                shards,
                self.metadata.num_shards()
            )));
        }
        if let Some(other) = self
            .claimed
            .iter()
            .find(|r| r.start < shards.end && shards.start < r.end)
        {
            return Err(SmbError::InvalidConfig(format!(
                "shard range {:?} overlaps {:?}",
                shards, other
            )));
        }

        self.claimed.push(shards.clone());
        self.state = WriteState::Writing;
        Ok(ShardWriter::new(
            self.path.clone(),
            self.temp_dir.clone(),
            Arc::clone(&self.metadata),
            Arc::clone(&self.ops),
            self.sort_buffer_records,
            shards,
        ))
    }

    /// Publishes the dataset from the staged output of every shard writer.
    ///
    /// `staged` must hold exactly one output per claimed shard range; a
    /// missing or repeated range fails the run before anything is moved.
    /// On success the descriptor is the last file written. On failure the run
    /// is `Failed`, every file it moved into the dataset directory is removed
    /// and the dataset stays unpublished.
    pub fn commit(&mut self, staged: Vec<StagedShards>) -> Result<PublishedDataset> {
        if !matches!(self.state, WriteState::Open | WriteState::Writing) {
            return Err(SmbError::InvalidState {
                state: self.state,
                action: "commit",
            });
        }
        if let Some(foreign) = staged.iter().find(|s| s.temp_dir != self.temp_dir) {
            return Err(SmbError::InvalidConfig(format!(
                "shards {:?} were staged by another write run",
                foreign.shards
            )));
        }

        let mut returned: Vec<Range<u32>> = staged.iter().map(StagedShards::shards).collect();
        let mut claimed = self.claimed.clone();
        returned.sort_by_key(|r| r.start);
        claimed.sort_by_key(|r| r.start);
        if returned != claimed {
            self.state = WriteState::Failed;
            self.remove_temp_dir();
            warn!(path = %self.path.display(), ?claimed, ?returned, "incomplete commit rejected");
            return Err(SmbError::InvalidConfig(format!(
                "staged shards {:?} do not match the claimed shards {:?}",
                returned, claimed
            )));
        }

        self.state = WriteState::Committing;
        let mut relocated = Vec::new();
        match self.publish(staged, &mut relocated) {
            Ok(published) => {
                self.state = WriteState::Published;
                if let Err(e) = fs::remove_dir_all(&self.temp_dir) {
                    warn!(dir = %self.temp_dir.display(), error = %e, "failed to remove temp dir");
                }
                info!(
                    path = %self.path.display(),
                    records = published.records,
                    files = published.files,
                    "published dataset"
                );
                Ok(published)
            }
            Err(e) => {
                self.state = WriteState::Failed;
                warn!(path = %self.path.display(), error = %e, "commit failed, rolling back");
                for file in &relocated {
                    let _ = fs::remove_file(file);
                }
                self.remove_temp_dir();
                Err(e)
            }
        }
    }

    fn publish(
        &self,
        staged: Vec<StagedShards>,
        relocated: &mut Vec<PathBuf>,
    ) -> Result<PublishedDataset> {
        let mut written = BTreeMap::new();
        let mut records = 0u64;
        let mut null_key_records = 0u64;

        for file in staged.into_iter().flat_map(|s| s.files) {
            let dest = self.path.join(&file.name);
            fs::rename(&file.temp_path, &dest)
                .map_err(|e| SmbError::commit(&self.path, file.id, SmbError::io(&dest, e)))?;
            relocated.push(dest);
            match file.id {
                Some(id) => {
                    records += file.records;
                    written.insert(id, file.records);
                }
                None => null_key_records += file.records,
            }
        }

        // Ids nobody wrote still get a (valid, empty) file.
        for id in self.metadata.all_ids() {
            if written.contains_key(&id) {
                continue;
            }
            let dest = self.path.join(self.metadata.file_name(id));
            let writer = self
                .ops
                .create_writer(&dest)
                .map_err(|e| SmbError::commit(&self.path, Some(id), e))?;
            relocated.push(dest);
            writer
                .close()
                .map_err(|e| SmbError::commit(&self.path, Some(id), e))?;
        }

        self.metadata
            .save(&self.path)
            .map_err(|e| SmbError::commit(&self.path, None, e))?;

        Ok(PublishedDataset {
            path: self.path.clone(),
            metadata: (*self.metadata).clone(),
            records,
            null_key_records,
            files: relocated.len(),
        })
    }

    /// Abandons the run and removes everything it staged.
    pub fn abort(mut self) -> Result<()> {
        if self.state == WriteState::Published {
            return Err(SmbError::InvalidState {
                state: self.state,
                action: "abort",
            });
        }
        self.state = WriteState::Failed;
        match fs::remove_dir_all(&self.temp_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SmbError::io(&self.temp_dir, e)),
        }
    }

    fn remove_temp_dir(&self) {
        if let Err(e) = fs::remove_dir_all(&self.temp_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.temp_dir.display(), error = %e, "failed to remove temp dir");
            }
        }
    }
}

impl<R> Drop for WriteRun<R> {
    fn drop(&mut self) {
        if self.state != WriteState::Published {
            let _ = fs::remove_dir_all(&self.temp_dir);
        }
    }
}

/// Writes `records` as a bucketed dataset at `path` with a single writer
/// covering every shard.
pub fn write_all<R, I>(
    path: impl Into<PathBuf>,
    metadata: BucketMetadata,
    ops: Arc<dyn FileOperations<Record = R>>,
    options: WriteOptions,
    records: I,
) -> Result<PublishedDataset>
where
    R: ExtractKey + Send + 'static,
    I: IntoIterator<Item = R>,
{
    let mut run = WriteRun::open(path, metadata, ops, options)?;
    let mut writer = run.shard_writer(0..run.metadata().num_shards())?;
    for record in records {
        writer.write(record)?;
    }
    let staged = writer.finish()?;
    run.commit(vec![staged])
}

/// Buckets and buffers the records of one shard range.
pub struct ShardWriter<R> {
    path: PathBuf,
    temp_dir: PathBuf,
    metadata: Arc<BucketMetadata>,
    ops: Arc<dyn FileOperations<Record = R>>,
    sort_buffer_records: usize,
    shards: Range<u32>,
    state: WriteState,
    buffers: BTreeMap<BucketShardId, SortBuffer<R>>,
    /// Next shard offset per bucket (round-robin within `shards`).
    next_shard: Vec<u32>,
    null_writers: BTreeMap<u32, (Box<dyn RecordWriter<R>>, u64)>,
    next_null_shard: u32,
}

impl<R> ShardWriter<R>
where
    R: ExtractKey + Send + 'static,
{
    fn new(
        path: PathBuf,
        temp_dir: PathBuf,
        metadata: Arc<BucketMetadata>,
        ops: Arc<dyn FileOperations<Record = R>>,
        sort_buffer_records: usize,
        shards: Range<u32>,
    ) -> Self {
        let num_buckets = metadata.num_buckets() as usize;
        Self {
            path,
            temp_dir,
            metadata,
            ops,
            sort_buffer_records,
            shards,
            state: WriteState::Writing,
            buffers: BTreeMap::new(),
            next_shard: vec![0; num_buckets],
            null_writers: BTreeMap::new(),
            next_null_shard: 0,
        }
    }

    pub fn shards(&self) -> Range<u32> {
        self.shards.clone()
    }

    pub fn state(&self) -> WriteState {
        self.state
    }

    fn fail(&mut self, bucket: Option<BucketShardId>, source: impl Into<SmbError>) -> SmbError {
        self.state = WriteState::Failed;
        SmbError::commit(&self.path, bucket, source)
    }

    fn shard_width(&self) -> u32 {
        self.shards.end - self.shards.start
    }

    /// Routes `record` to its bucket, or to a null-key file if it has no key.
    pub fn write(&mut self, record: R) -> Result<()> {
        if self.state != WriteState::Writing {
            return Err(SmbError::InvalidState {
                state: self.state,
                action: "write",
            });
        }

        let key = match self.metadata.extract_key(&record) {
            Ok(key) => key,
            Err(e) => return Err(self.fail(None, e)),
        };

        let Some(key) = key else {
            return self.write_null_key(record);
        };

        let bucket = self.metadata.bucket_id(&key);
        let offset = &mut self.next_shard[bucket as usize];
        let shard = self.shards.start + *offset;
        *offset = (*offset + 1) % (self.shards.end - self.shards.start);
        let id = BucketShardId::new(bucket, shard);

        let capacity = self.sort_buffer_records;
        let temp_dir = &self.temp_dir;
        let buffer = self
            .buffers
            .entry(id)
            .or_insert_with(|| SortBuffer::new(id, capacity, temp_dir));
        if let Err(e) = buffer.push(key, record, self.ops.as_ref(), &self.metadata) {
            return Err(self.fail(Some(id), e));
        }
        Ok(())
    }

    fn write_null_key(&mut self, record: R) -> Result<()> {
        let shard = self.shards.start + self.next_null_shard;
        self.next_null_shard = (self.next_null_shard + 1) % self.shard_width();

        if !self.null_writers.contains_key(&shard) {
            let path = self.temp_dir.join(self.metadata.null_keys_file_name(shard));
            match self.ops.create_writer(&path) {
                Ok(writer) => {
                    self.null_writers.insert(shard, (writer, 0));
                }
                Err(e) => return Err(self.fail(None, e)),
            }
        }
        let result = match self.null_writers.get_mut(&shard) {
            Some((writer, count)) => writer.write(&record).map(|()| *count += 1),
            None => Ok(()),
        };
        result.map_err(|e| self.fail(None, e))
    }

    /// Sorts every bucket of this writer and stages the resulting files.
    pub fn finish(mut self) -> Result<StagedShards> {
        if self.state != WriteState::Writing {
            return Err(SmbError::InvalidState {
                state: self.state,
                action: "finish",
            });
        }
        self.state = WriteState::Sorting;

        let mut files = Vec::with_capacity(self.buffers.len() + self.null_writers.len());
        let buffers = std::mem::take(&mut self.buffers);
        for (id, buffer) in buffers {
            let name = self.metadata.file_name(id);
            let temp_path = self.temp_dir.join(&name);
            let buffered = buffer.len();
            let records = match buffer.write_sorted(self.ops.as_ref(), &self.metadata, &temp_path)
            {
                Ok(n) => n,
                Err(e) => return Err(self.fail(Some(id), e)),
            };
            debug_assert_eq!(records, buffered);
            files.push(StagedFile {
                id: Some(id),
                name,
                temp_path,
                records,
            });
        }

        let null_writers = std::mem::take(&mut self.null_writers);
        for (shard, (writer, records)) in null_writers {
            if let Err(e) = writer.close() {
                return Err(self.fail(None, e));
            }
            let name = self.metadata.null_keys_file_name(shard);
            files.push(StagedFile {
                id: None,
                temp_path: self.temp_dir.join(&name),
                name,
                records,
            });
        }

        debug!(
            path = %self.path.display(),
            shards = ?self.shards,
            files = files.len(),
            "staged shard range"
        );
        Ok(StagedShards {
            temp_dir: self.temp_dir.clone(),
            shards: self.shards.clone(),
            files,
        })
    }
}

