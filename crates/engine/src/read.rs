//! Read path: source validation, per-bucket file resolution and merge-join.
//!
//! ```text
//!  source 0 ── bucket b0 ── shard files ──┐ SortedMerge ─┐
//!                                         │              │
//!  source 1 ── bucket b1 ── shard files ──┤ SortedMerge ─┼─> CoGroupIterator(b)
//!             (+ finer/coarser buckets)   │              │
//!  source N ──   ...                    ──┘ SortedMerge ─┘
//! ```
//!
//! Each target bucket is an independent read unit; [`SortedBucketSource::iter`]
//! merges all of them into one globally ordered stream.

use fileops::{FileOperations, Projection, ReadOptions};
use metadata::{BucketMetadata, BucketShardId, ExtractKey, HashType, KeyOrder, KeyType};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Result, SmbError};
use crate::merge::{keyed, CoGroup, CoGroupIterator, JoinMode, KeyFilter, KeyedStream};
use crate::merge::{SortedCoGroups, SortedMerge};

/// One dataset participating in a read, with its own projection/predicate.
pub struct BucketedInput<R> {
    pub path: PathBuf,
    pub ops: Arc<dyn FileOperations<Record = R>>,
    pub options: ReadOptions<R>,
}

impl<R> BucketedInput<R> {
    pub fn new(path: impl Into<PathBuf>, ops: Arc<dyn FileOperations<Record = R>>) -> Self {
        Self {
            path: path.into(),
            ops,
            options: ReadOptions::new(),
        }
    }

    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.options = self.options.with_projection(projection);
        self
    }

    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.options = self.options.with_predicate(predicate);
        self
    }
}

/// How many target buckets a read is split into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetParallelism {
    /// The largest source bucket count (no source bucket is read twice).
    #[default]
    Max,
    /// The smallest source bucket count (fewest, largest read units).
    Min,
    /// A power of two between the smallest and largest source counts.
    Exact(u32),
}

struct Source<R> {
    path: PathBuf,
    ops: Arc<dyn FileOperations<Record = R>>,
    options: ReadOptions<R>,
    metadata: Arc<BucketMetadata>,
}

/// A validated set of bucketed inputs that can be merge-joined.
pub struct SortedBucketSource<R> {
    sources: Vec<Source<R>>,
    mode: JoinMode,
    target_num_buckets: u32,
    key_type: KeyType,
    key_order: KeyOrder,
    hash_type: HashType,
    /// Set when some source is coarser than the target.
    rehash: bool,
}

impl<R> SortedBucketSource<R>
where
    R: ExtractKey + Send + 'static,
{
    /// Validates `inputs` and prepares a read at the finest bucket count.
    pub fn open(inputs: Vec<BucketedInput<R>>, mode: JoinMode) -> Result<Self> {
        Self::open_with(inputs, mode, TargetParallelism::Max)
    }

    /// Validates `inputs` before any data file is opened.
    ///
    /// # Errors
    ///
    /// Every failure here is a configuration error: no inputs, a bad primary
    /// index, an unpublished or unreadable descriptor, a format whose
    /// extension differs from the descriptor's, an incompatible pair of
    /// sources, or an unusable target parallelism.
    pub fn open_with(
        inputs: Vec<BucketedInput<R>>,
        mode: JoinMode,
        parallelism: TargetParallelism,
    ) -> Result<Self> {
        if inputs.is_empty() {
            return Err(SmbError::InvalidConfig("no inputs to read".to_string()));
        }
        if let JoinMode::Left { primary } = mode {
            if primary >= inputs.len() {
                return Err(SmbError::InvalidConfig(format!(
                    "primary source {} out of range for {} inputs",
                    primary,
                    inputs.len()
                )));
            }
        }

        let mut sources = Vec::with_capacity(inputs.len());
        for input in inputs {
            let metadata = load_published(&input.path)?;
            if input.ops.extension() != metadata.filename_suffix() {
                return Err(SmbError::InvalidConfig(format!(
                    "dataset at {} holds {} files, reader expects {}",
                    input.path.display(),
                    metadata.filename_suffix(),
                    input.ops.extension()
                )));
            }

            let mut options = input.options;
            if let Some(projection) = options.projection.take() {
                options.projection = Some(projection.with_field(metadata.key_field()));
            }
            sources.push(Source {
                path: input.path,
                ops: input.ops,
                options,
                metadata: Arc::new(metadata),
            });
        }

        for (i, left) in sources.iter().enumerate() {
            for right in &sources[i + 1..] {
                left.metadata
                    .check_compatible(&right.metadata)
                    .map_err(|dimension| SmbError::Incompatible {
                        left: left.path.clone(),
                        right: right.path.clone(),
                        dimension,
                    })?;
            }
        }

        let counts = sources.iter().map(|s| s.metadata.num_buckets());
        let min = counts.clone().min().unwrap_or(1);
        let max = counts.max().unwrap_or(1);
        let target_num_buckets = match parallelism {
            TargetParallelism::Max => max,
            TargetParallelism::Min => min,
            TargetParallelism::Exact(n) => {
                if !n.is_power_of_two() || n < min || n > max {
                    return Err(SmbError::InvalidConfig(format!(
                        "target parallelism {} must be a power of two in {}..={}",
                        n, min, max
                    )));
                }
                n
            }
        };

        let first = &sources[0].metadata;
        let (key_type, key_order, hash_type) =
            (first.key_type(), first.key_order(), first.hash_type());

        info!(
            sources = sources.len(),
            target_buckets = target_num_buckets,
            mode = ?mode,
            "validated bucketed sources"
        );

        Ok(Self {
            rehash: min < target_num_buckets,
            sources,
            mode,
            target_num_buckets,
            key_type,
            key_order,
            hash_type,
        })
    }

    pub fn target_num_buckets(&self) -> u32 {
        self.target_num_buckets
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn mode(&self) -> JoinMode {
        self.mode
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Descriptor of the `index`-th source.
    pub fn metadata(&self, index: usize) -> Option<&BucketMetadata> {
        self.sources.get(index).map(|s| s.metadata.as_ref())
    }

    /// Opens every shard file of `source`'s buckets contributing to `target`
    /// and merges them into one sorted stream.
    fn open_source(&self, source: &Source<R>, target: u32) -> Result<SortedMerge<R>> {
        let metadata = &source.metadata;
        let mut streams: Vec<KeyedStream<R>> = Vec::new();

        for bucket in metadata.buckets_for(target, self.target_num_buckets) {
            for shard in 0..metadata.num_shards() {
                let path = source
                    .path
                    .join(metadata.file_name(BucketShardId::new(bucket, shard)));
                match source.ops.iterator(&path, &source.options) {
                    Ok(iter) => streams.push(keyed(iter, Arc::clone(metadata))),
                    Err(e) if e.is_not_found() => {
                        debug!(path = %path.display(), "shard file missing, treating as empty");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(SortedMerge::new(streams, self.key_order))
    }

    /// Merge-joins target bucket `bucket` across all sources.
    ///
    /// This is the unit of parallelism: buckets share no state and can be
    /// read on separate threads.
    pub fn read_bucket(&self, bucket: u32) -> Result<CoGroupIterator<R>> {
        if bucket >= self.target_num_buckets {
            return Err(SmbError::InvalidConfig(format!(
                "bucket {} out of range for {} target buckets",
                bucket, self.target_num_buckets
            )));
        }

        let merges = self
            .sources
            .iter()
            .map(|s| self.open_source(s, bucket))
            .collect::<Result<Vec<_>>>()?;
        let filter = self.rehash.then_some(KeyFilter {
            hash_type: self.hash_type,
            num_buckets: self.target_num_buckets,
        });

        debug!(bucket, sources = merges.len(), "opened target bucket");
        CoGroupIterator::new(
            bucket,
            merges,
            self.key_order,
            self.key_type,
            self.mode,
            filter,
        )
    }

    /// Streams every co-group of the read in key order across all buckets.
    pub fn iter(&self) -> Result<SortedCoGroups<R>> {
        let buckets = (0..self.target_num_buckets)
            .map(|b| self.read_bucket(b))
            .collect::<Result<Vec<_>>>()?;
        Ok(SortedCoGroups::new(buckets, self.key_order))
    }

    /// Reads every target bucket in parallel on the rayon pool.
    ///
    /// The result is indexed by target bucket; each inner vector is in key
    /// order.
    pub fn collect_parallel(&self) -> Result<Vec<Vec<CoGroup<R>>>> {
        (0..self.target_num_buckets)
            .into_par_iter()
            .map(|bucket| -> Result<Vec<CoGroup<R>>> { self.read_bucket(bucket)?.collect() })
            .collect()
    }
}

/// Loads the descriptor of `dir`, treating a missing one as unpublished.
pub fn load_published(dir: &Path) -> Result<BucketMetadata> {
    match BucketMetadata::load(dir) {
        Ok(Some(metadata)) => Ok(metadata),
        Ok(None) => Err(SmbError::Unpublished {
            path: dir.to_path_buf(),
        }),
        Err(source) => Err(SmbError::InvalidMetadata {
            path: dir.to_path_buf(),
            source,
        }),
    }
}
