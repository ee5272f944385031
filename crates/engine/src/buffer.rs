//! Bounded sort buffer with spill-to-disk.
//!
//! One buffer exists per (bucket, shard) of a shard writer. Records are held
//! in memory until `capacity` is reached; then the buffer is sorted and
//! written to a spill file in the run's temp directory. On finish the spills
//! and the in-memory remainder are merged into the final data file, so a
//! bucket larger than memory still comes out fully sorted.

use fileops::{FileOperations, ReadOptions};
use metadata::{BucketMetadata, BucketShardId, ExtractKey, Key};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, SmbError};
use crate::merge::{keyed, KeyedStream, SortedMerge};

pub(crate) struct SortBuffer<R> {
    id: BucketShardId,
    records: Vec<(Key, R)>,
    capacity: usize,
    spills: Vec<PathBuf>,
    spill_dir: PathBuf,
    total: u64,
}

impl<R> SortBuffer<R>
where
    R: ExtractKey + Send + 'static,
{
    pub(crate) fn new(id: BucketShardId, capacity: usize, spill_dir: &Path) -> Self {
        Self {
            id,
            records: Vec::new(),
            capacity: capacity.max(1),
            spills: Vec::new(),
            spill_dir: spill_dir.to_path_buf(),
            total: 0,
        }
    }

    /// Number of records pushed so far.
    pub(crate) fn len(&self) -> u64 {
        self.total
    }

    pub(crate) fn push(
        &mut self,
        key: Key,
        record: R,
        ops: &dyn FileOperations<Record = R>,
        metadata: &BucketMetadata,
    ) -> Result<()> {
        self.records.push((key, record));
        self.total += 1;
        if self.records.len() >= self.capacity {
            self.spill(ops, metadata)?;
        }
        Ok(())
    }

    fn sort(&mut self, metadata: &BucketMetadata) {
        let order = metadata.key_order();
        // Stable: equal keys keep their arrival order.
        self.records
            .sort_by(|(a, _), (b, _)| order.compare(a.as_bytes(), b.as_bytes()));
    }

    fn spill(
        &mut self,
        ops: &dyn FileOperations<Record = R>,
        metadata: &BucketMetadata,
    ) -> Result<()> {
        if self.records.is_empty() {
            return Ok(());
        }
        self.sort(metadata);

        let path = self.spill_dir.join(format!(
            "spill-{:05}-{:05}-{:04}{}",
            self.id.bucket_id,
            self.id.shard_id,
            self.spills.len(),
            ops.extension()
        ));
        let mut writer = ops.create_writer(&path)?;
        for (_, record) in self.records.drain(..) {
            writer.write(&record)?;
        }
        writer.close()?;

        debug!(
            bucket = self.id.bucket_id,
            shard = self.id.shard_id,
            spill = self.spills.len(),
            "spilled sort buffer"
        );
        self.spills.push(path);
        Ok(())
    }

    /// Writes every buffered record to `dest` in key order and consumes the
    /// buffer. Returns the number of records written.
    pub(crate) fn write_sorted(
        mut self,
        ops: &dyn FileOperations<Record = R>,
        metadata: &Arc<BucketMetadata>,
        dest: &Path,
    ) -> Result<u64> {
        let mut writer = ops.create_writer(dest)?;
        let mut written = 0u64;

        if self.spills.is_empty() {
            self.sort(metadata);
            for (_, record) in &self.records {
                writer.write(record)?;
                written += 1;
            }
            writer.close()?;
            return Ok(written);
        }

        self.spill(ops, metadata)?;
        let options = ReadOptions::new();
        let mut runs: Vec<KeyedStream<R>> = Vec::with_capacity(self.spills.len());
        for path in &self.spills {
            runs.push(keyed(ops.iterator(path, &options)?, Arc::clone(metadata)));
        }
        let merge = SortedMerge::new(runs, metadata.key_order());
        debug!(
            bucket = self.id.bucket_id,
            shard = self.id.shard_id,
            runs = merge.input_count(),
            "merging spill runs"
        );
        for item in merge {
            let (_, record) = item?;
            writer.write(&record)?;
            written += 1;
        }
        writer.close()?;

        for path in self.spills.drain(..) {
            fs::remove_file(&path).map_err(|e| SmbError::io(&path, e))?;
        }
        Ok(written)
    }
}
