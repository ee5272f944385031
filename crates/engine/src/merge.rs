//! Streaming k-way merges.
//!
//! Three layers, all driven by the same min-heap entry:
//!
//! 1. [`SortedMerge`] merges independently sorted `(key, record)` streams
//!    (the shard files of one source bucket, or the spill runs of one sort
//!    buffer) into one sorted stream.
//! 2. [`CoGroupIterator`] walks one merged stream per source in lockstep and
//!    emits each key once, with every source's records for that key.
//! 3. [`SortedCoGroups`] merges the co-group streams of all target buckets
//!    into one globally ordered stream.
//!
//! Equal keys are resolved by source index, so a merge over the same inputs
//! always produces the same sequence.

use fileops::RecordIterator;
use metadata::{BucketMetadata, ExtractKey, HashType, Key, KeyOrder, KeyType};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::error::{Result, SmbError};

/// A fallible stream of records paired with their encoded keys.
pub(crate) type KeyedStream<R> = Box<dyn Iterator<Item = Result<(Key, R)>> + Send>;

/// Attaches keys to the records of `iter` using `metadata`'s key extractor.
///
/// Records inside a bucket file must carry a key; a key-less record there is
/// a decode failure.
pub(crate) fn keyed<R>(iter: RecordIterator<R>, metadata: Arc<BucketMetadata>) -> KeyedStream<R>
where
    R: ExtractKey + Send + 'static,
{
    Box::new(iter.map(move |item| {
        let record = item?;
        match metadata.extract_key(&record)? {
            Some(key) => Ok((key, record)),
            None => Err(SmbError::Key(metadata::MetadataError::InvalidKey {
                field: metadata.key_field().to_string(),
                reason: "record in a bucket file has no key".to_string(),
            })),
        }
    }))
}

/// A pending item from one input, ordered for a min-heap under `order`.
///
/// `BinaryHeap` is a max-heap, so the comparison is reversed: the entry with
/// the smallest key (per `order`) and then the lowest source index wins.
struct HeapEntry<T> {
    key: Key,
    payload: T,
    source: usize,
    order: KeyOrder,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .compare(other.key.as_bytes(), self.key.as_bytes())
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges sorted keyed streams into one sorted stream.
///
/// Each input is checked as it is consumed: a key that sorts before its
/// predecessor from the same input is reported as [`SmbError::OutOfOrder`].
/// An input failure is reported right after the last good item of that
/// input (or first, if an input fails on its first item), and the merge
/// yields nothing more after it.
pub(crate) struct SortedMerge<R> {
    inputs: Vec<KeyedStream<R>>,
    heap: BinaryHeap<HeapEntry<R>>,
    order: KeyOrder,
    pending: Option<SmbError>,
    failed: bool,
}

impl<R> SortedMerge<R> {
    /// Primes the heap with the first item of every input.
    pub(crate) fn new(mut inputs: Vec<KeyedStream<R>>, order: KeyOrder) -> Self {
        let mut heap = BinaryHeap::with_capacity(inputs.len());
        let mut pending = None;
        for (source, input) in inputs.iter_mut().enumerate() {
            match input.next() {
                Some(Ok((key, payload))) => heap.push(HeapEntry {
                    key,
                    payload,
                    source,
                    order,
                }),
                Some(Err(e)) => {
                    pending = Some(e);
                    break;
                }
                None => {}
            }
        }
        Self {
            inputs,
            heap,
            order,
            pending,
            failed: false,
        }
    }

    pub(crate) fn input_count(&self) -> usize {
        self.inputs.len()
    }
}

impl<R> Iterator for SortedMerge<R> {
    type Item = Result<(Key, R)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending.take() {
            self.failed = true;
            return Some(Err(e));
        }
        let top = self.heap.pop()?;

        // Refill from the input the popped entry came from.
        match self.inputs[top.source].next() {
            Some(Ok((key, payload))) => {
                if self.order.compare(key.as_bytes(), top.key.as_bytes()) == Ordering::Less {
                    self.pending = Some(SmbError::OutOfOrder {
                        previous: top.key.to_string(),
                        next: key.to_string(),
                    });
                } else {
                    self.heap.push(HeapEntry {
                        key,
                        payload,
                        source: top.source,
                        order: self.order,
                    });
                }
            }
            Some(Err(e)) => self.pending = Some(e),
            None => {}
        }

        Some(Ok((top.key, top.payload)))
    }
}

/// How co-groups with missing sources are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JoinMode {
    /// Emit only keys present in every source.
    #[default]
    Inner,
    /// Emit every key present in the `primary` source.
    Left { primary: usize },
    /// Emit every key present in any source.
    FullOuter,
}

impl JoinMode {
    /// Returns `true` if a co-group with these per-source groups is emitted.
    pub fn accepts<R>(&self, groups: &[Vec<R>]) -> bool {
        match self {
            JoinMode::Inner => groups.iter().all(|g| !g.is_empty()),
            JoinMode::Left { primary } => groups.get(*primary).map_or(false, |g| !g.is_empty()),
            JoinMode::FullOuter => true,
        }
    }
}

/// One key together with the records every source holds for it.
///
/// `groups[i]` belongs to the i-th source and is empty when that source has
/// no record with the key.
#[derive(Debug, Clone, PartialEq)]
pub struct CoGroup<R> {
    pub key: Key,
    pub groups: Vec<Vec<R>>,
}

impl<R> CoGroup<R> {
    pub fn group(&self, source: usize) -> &[R] {
        self.groups.get(source).map_or(&[], |g| g.as_slice())
    }

    /// Returns `true` when every source contributed at least one record.
    pub fn is_complete(&self) -> bool {
        self.groups.iter().all(|g| !g.is_empty())
    }
}

/// A merged per-source stream with one item of lookahead.
struct Cursor<R> {
    stream: SortedMerge<R>,
    head: Option<(Key, R)>,
}

impl<R> Cursor<R> {
    fn new(stream: SortedMerge<R>) -> Result<Self> {
        let mut cursor = Self { stream, head: None };
        cursor.advance()?;
        Ok(cursor)
    }

    fn advance(&mut self) -> Result<()> {
        self.head = self.stream.next().transpose()?;
        Ok(())
    }

    fn head_key(&self) -> Option<&Key> {
        self.head.as_ref().map(|(k, _)| k)
    }
}

/// Re-hash filter for targets served by coarser sources.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyFilter {
    pub(crate) hash_type: HashType,
    pub(crate) num_buckets: u32,
}

/// Cross-source merge of one target bucket.
///
/// Emits co-groups in strictly increasing key order (per the sources' key
/// order); each key appears at most once and all of a source's records for
/// it are delivered together.
///
/// A failing input ends the stream with [`SmbError::Merge`]. Its key is the
/// one whose group was being collected (that group is dropped), or `None`
/// when an input fails before the first key is reached.
pub struct CoGroupIterator<R> {
    bucket: u32,
    cursors: Vec<Cursor<R>>,
    order: KeyOrder,
    key_type: KeyType,
    mode: JoinMode,
    filter: Option<KeyFilter>,
    done: bool,
}

impl<R> CoGroupIterator<R> {
    pub(crate) fn new(
        bucket: u32,
        sources: Vec<SortedMerge<R>>,
        order: KeyOrder,
        key_type: KeyType,
        mode: JoinMode,
        filter: Option<KeyFilter>,
    ) -> Result<Self> {
        let cursors = sources
            .into_iter()
            .map(Cursor::new)
            .collect::<Result<Vec<_>>>()
            .map_err(|e| SmbError::Merge {
                bucket,
                key: None,
                source: Box::new(e),
            })?;
        Ok(Self {
            bucket,
            cursors,
            order,
            key_type,
            mode,
            filter,
            done: false,
        })
    }

    /// Target bucket this iterator covers.
    pub fn bucket(&self) -> u32 {
        self.bucket
    }

    fn merge_error(&self, key: Option<&Key>, source: SmbError) -> SmbError {
        SmbError::Merge {
            bucket: self.bucket,
            key: key.map(|k| self.key_type.render(k)),
            source: Box::new(source),
        }
    }

    /// Current minimum key across all sources (the merge frontier).
    fn frontier(&self) -> Option<Key> {
        self.cursors
            .iter()
            .filter_map(Cursor::head_key)
            .min_by(|a, b| self.order.compare(a.as_bytes(), b.as_bytes()))
            .cloned()
    }

    /// Drains every record equal to `key` from every cursor.
    fn collect_groups(&mut self, key: &Key) -> Result<Vec<Vec<R>>> {
        let mut groups = Vec::with_capacity(self.cursors.len());
        for cursor in &mut self.cursors {
            let mut group = Vec::new();
            while cursor.head_key() == Some(key) {
                if let Some((_, record)) = cursor.head.take() {
                    group.push(record);
                }
                cursor.advance()?;
            }
            groups.push(group);
        }
        Ok(groups)
    }
}

impl<R> Iterator for CoGroupIterator<R> {
    type Item = Result<CoGroup<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some(key) = self.frontier() else {
                self.done = true;
                break;
            };

            let groups = match self.collect_groups(&key) {
                Ok(groups) => groups,
                Err(e) => {
                    self.done = true;
                    return Some(Err(self.merge_error(Some(&key), e)));
                }
            };

            if let Some(filter) = self.filter {
                if filter.hash_type.bucket_of(key.as_bytes(), filter.num_buckets) != self.bucket {
                    continue;
                }
            }
            if !self.mode.accepts(&groups) {
                continue;
            }
            return Some(Ok(CoGroup { key, groups }));
        }
        None
    }
}

/// Merges the co-group streams of several buckets into one stream ordered by
/// key across the whole read.
///
/// Every key lives in exactly one target bucket, so no two buckets ever
/// produce the same key.
pub struct SortedCoGroups<R> {
    buckets: Vec<CoGroupIterator<R>>,
    heap: BinaryHeap<HeapEntry<CoGroup<R>>>,
    order: KeyOrder,
    pending: Option<SmbError>,
    failed: bool,
}

impl<R> SortedCoGroups<R> {
    pub(crate) fn new(mut buckets: Vec<CoGroupIterator<R>>, order: KeyOrder) -> Self {
        let mut heap = BinaryHeap::with_capacity(buckets.len());
        let mut pending = None;
        for (source, bucket) in buckets.iter_mut().enumerate() {
            match bucket.next() {
                Some(Ok(group)) => heap.push(HeapEntry {
                    key: group.key.clone(),
                    payload: group,
                    source,
                    order,
                }),
                Some(Err(e)) => {
                    pending = Some(e);
                    break;
                }
                None => {}
            }
        }
        Self {
            buckets,
            heap,
            order,
            pending,
            failed: false,
        }
    }
}

impl<R> Iterator for SortedCoGroups<R> {
    type Item = Result<CoGroup<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending.take() {
            self.failed = true;
            return Some(Err(e));
        }
        let top = self.heap.pop()?;

        match self.buckets[top.source].next() {
            Some(Ok(group)) => self.heap.push(HeapEntry {
                key: group.key.clone(),
                payload: group,
                source: top.source,
                order: self.order,
            }),
            Some(Err(e)) => self.pending = Some(e),
            None => {}
        }

        Some(Ok(top.payload))
    }
}
