//! Bucket/shard identities and the bucket refinement rule.
//!
//! Because every bucket count is a power of two and bucket ids are the low
//! bits of the key hash, a dataset with `n` buckets and one with `m = n * 2^k`
//! buckets partition keys compatibly: fine bucket `f` always lies inside
//! coarse bucket `f mod n`. The functions here are pure arithmetic over those
//! two integers.

use std::fmt;

/// Identifies exactly one physical data file of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketShardId {
    pub bucket_id: u32,
    pub shard_id: u32,
}

impl BucketShardId {
    pub fn new(bucket_id: u32, shard_id: u32) -> Self {
        Self {
            bucket_id,
            shard_id,
        }
    }
}

impl fmt::Display for BucketShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket {} shard {}", self.bucket_id, self.shard_id)
    }
}

/// Returns `true` when one bucket count evenly divides the other by a power
/// of two.
pub fn bucket_counts_compatible(a: u32, b: u32) -> bool {
    if a == 0 || b == 0 {
        return false;
    }
    let (small, large) = if a <= b { (a, b) } else { (b, a) };
    large % small == 0 && (large / small).is_power_of_two()
}

/// Source buckets that together hold every key of `target_bucket` when the
/// read runs with `target_num_buckets` buckets.
///
/// * coarser source: the single bucket `target_bucket mod source_num_buckets`
///   (which also holds keys of other target buckets, see
///   [`needs_rehash`]).
/// * finer source: every `target_bucket + k * target_num_buckets`.
pub fn source_buckets_for(
    target_bucket: u32,
    target_num_buckets: u32,
    source_num_buckets: u32,
) -> Vec<u32> {
    debug_assert!(target_bucket < target_num_buckets);
    if source_num_buckets <= target_num_buckets {
        vec![target_bucket % source_num_buckets]
    } else {
        let fan_out = source_num_buckets / target_num_buckets;
        (0..fan_out)
            .map(|k| target_bucket + k * target_num_buckets)
            .collect()
    }
}

/// A source coarser than the target yields keys of several target buckets;
/// those must be filtered by re-hashing against the target count.
pub fn needs_rehash(target_num_buckets: u32, source_num_buckets: u32) -> bool {
    source_num_buckets < target_num_buckets
}
