use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{write_all, BucketedInput, JoinMode, SortedBucketSource, WriteOptions};
use fileops::{FileOperations, KvFileOperations, KvRecord};
use metadata::{BucketMetadata, HashType, KeyType};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const N_RECORDS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn ops() -> Arc<dyn FileOperations<Record = KvRecord>> {
    Arc::new(KvFileOperations)
}

fn meta(num_buckets: u32, num_shards: u32) -> BucketMetadata {
    BucketMetadata::new(num_buckets, num_shards, KeyType::String, "key", HashType::Xxh3).unwrap()
}

fn records(step: usize) -> Vec<KvRecord> {
    (0..N_RECORDS)
        .map(|i| KvRecord::new(format!("key{:06}", (i * step) % N_RECORDS), vec![b'x'; VALUE_SIZE]))
        .collect()
}

fn write(path: &Path, num_buckets: u32, options: WriteOptions) {
    write_all(path, meta(num_buckets, 2), ops(), options, records(7)).unwrap();
}

fn write_benchmark(c: &mut Criterion) {
    c.bench_function("smb_write_10k_in_memory", |b| {
        b.iter_batched(
            || tempdir().unwrap(),
            |dir| write(&dir.path().join("ds"), 8, WriteOptions::default()),
            BatchSize::SmallInput,
        );
    });

    c.bench_function("smb_write_10k_spilling", |b| {
        b.iter_batched(
            || tempdir().unwrap(),
            |dir| {
                let options = WriteOptions::default().with_sort_buffer_records(256);
                write(&dir.path().join("ds"), 8, options)
            },
            BatchSize::SmallInput,
        );
    });
}

fn join_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    write(&a, 4, WriteOptions::default());
    write(&b, 16, WriteOptions::default());

    c.bench_function("smb_inner_join_10k_x_10k", |bench| {
        bench.iter(|| {
            let source = SortedBucketSource::open(
                vec![BucketedInput::new(&a, ops()), BucketedInput::new(&b, ops())],
                JoinMode::Inner,
            )
            .unwrap();
            let groups = source.iter().unwrap().count();
            assert_eq!(groups, N_RECORDS);
        });
    });

    c.bench_function("smb_inner_join_parallel_buckets", |bench| {
        bench.iter(|| {
            let source = SortedBucketSource::open(
                vec![BucketedInput::new(&a, ops()), BucketedInput::new(&b, ops())],
                JoinMode::Inner,
            )
            .unwrap();
            let groups: usize = source.collect_parallel().unwrap().iter().map(Vec::len).sum();
            assert_eq!(groups, N_RECORDS);
        });
    });
}

criterion_group!(benches, write_benchmark, join_benchmark);
criterion_main!(benches);
