use super::helpers::*;
use crate::*;
use anyhow::Result;
use fileops::{JsonRecord, KvRecord, Projection};
use metadata::{BucketMetadata, HashType, Incompatibility, KeyOrder, KeyType};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Source A: 2 buckets, keys {1:"a", 3:"c"}. Source B: 4 buckets, keys
/// {1:"x", 2:"y", 3:"z"}.
fn two_sources(root: &Path) -> (PathBuf, PathBuf) {
    let a = root.join("a");
    let b = root.join("b");
    write_json(&a, json_meta(2), vec![row(1, "a"), row(3, "c")]);
    write_json(&b, json_meta(4), vec![row(1, "x"), row(2, "y"), row(3, "z")]);
    (a, b)
}

fn join(
    paths: &[&PathBuf],
    mode: JoinMode,
    parallelism: TargetParallelism,
) -> Result<Vec<(i64, Vec<Vec<String>>)>> {
    let inputs = paths
        .iter()
        .map(|p| BucketedInput::new(*p, json_ops()))
        .collect();
    let source = SortedBucketSource::open_with(inputs, mode, parallelism)?;
    let mut out = Vec::new();
    for group in source.iter()? {
        let group = group?;
        let vals = (0..paths.len()).map(|i| values(&group, i)).collect();
        out.push((int_key(&group), vals));
    }
    Ok(out)
}

fn s(v: &[&str]) -> Vec<String> {
    v.iter().map(|x| x.to_string()).collect()
}

// --------------------- Heterogeneous bucket counts ---------------------

#[test]
fn inner_join_across_bucket_counts() -> Result<()> {
    let dir = tempdir()?;
    let (a, b) = two_sources(dir.path());

    let out = join(&[&a, &b], JoinMode::Inner, TargetParallelism::Max)?;
    assert_eq!(
        out,
        vec![
            (1, vec![s(&["a"]), s(&["x"])]),
            (3, vec![s(&["c"]), s(&["z"])]),
        ]
    );
    Ok(())
}

#[test]
fn full_outer_join_keeps_missing_matches() -> Result<()> {
    let dir = tempdir()?;
    let (a, b) = two_sources(dir.path());

    let out = join(&[&a, &b], JoinMode::FullOuter, TargetParallelism::Max)?;
    assert_eq!(
        out,
        vec![
            (1, vec![s(&["a"]), s(&["x"])]),
            (2, vec![vec![], s(&["y"])]),
            (3, vec![s(&["c"]), s(&["z"])]),
        ]
    );
    Ok(())
}

#[test]
fn left_join_follows_primary() -> Result<()> {
    let dir = tempdir()?;
    let (a, b) = two_sources(dir.path());

    let on_a = join(&[&a, &b], JoinMode::Left { primary: 0 }, TargetParallelism::Max)?;
    assert_eq!(on_a.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![1, 3]);

    let on_b = join(&[&a, &b], JoinMode::Left { primary: 1 }, TargetParallelism::Max)?;
    assert_eq!(on_b.iter().map(|(k, _)| *k).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(on_b[1].1, vec![vec![], s(&["y"])]);
    Ok(())
}

#[test]
fn min_parallelism_rehashes_finer_source() -> Result<()> {
    let dir = tempdir()?;
    let (a, b) = two_sources(dir.path());

    let max = join(&[&a, &b], JoinMode::FullOuter, TargetParallelism::Max)?;
    let min = join(&[&a, &b], JoinMode::FullOuter, TargetParallelism::Min)?;
    let exact = join(&[&a, &b], JoinMode::FullOuter, TargetParallelism::Exact(2))?;
    assert_eq!(max, min);
    assert_eq!(max, exact);
    Ok(())
}

#[test]
fn coarse_source_key_emitted_once_with_many_buckets() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    write_json(&a, json_meta(1), (0..40).map(|i| row(i, "a")).collect());
    write_json(&b, json_meta(8), (20..60).map(|i| row(i, "b")).collect());

    let out = join(&[&a, &b], JoinMode::FullOuter, TargetParallelism::Max)?;
    let keys: Vec<i64> = out.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, (0..60).collect::<Vec<_>>());

    let inner = join(&[&a, &b], JoinMode::Inner, TargetParallelism::Max)?;
    assert_eq!(inner.len(), 20);
    Ok(())
}

#[test]
fn bad_target_parallelism_rejected() -> Result<()> {
    let dir = tempdir()?;
    let (a, b) = two_sources(dir.path());

    for n in [1, 3, 8] {
        let inputs = vec![
            BucketedInput::new(&a, json_ops()),
            BucketedInput::new(&b, json_ops()),
        ];
        let err = SortedBucketSource::open_with(inputs, JoinMode::Inner, TargetParallelism::Exact(n))
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration, "exact {}", n);
    }
    Ok(())
}

// --------------------- Ordering guarantees ---------------------

#[test]
fn output_keys_strictly_increasing() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let meta = |n| kv_meta(n, 3);
    write_kv(
        &a,
        meta(4),
        (0..300).map(|i| kv(&format!("{:x}", i * 7 % 211), "a")).collect(),
    );
    write_kv(
        &b,
        meta(16),
        (0..300).map(|i| kv(&format!("{:x}", i * 13 % 197), "b")).collect(),
    );

    let source = SortedBucketSource::open(
        vec![BucketedInput::new(&a, kv_ops()), BucketedInput::new(&b, kv_ops())],
        JoinMode::FullOuter,
    )?;
    let groups: Vec<CoGroup<KvRecord>> = source.iter()?.collect::<crate::Result<_>>()?;
    assert!(!groups.is_empty());
    for pair in groups.windows(2) {
        assert!(pair[0].key < pair[1].key, "{} !< {}", pair[0].key, pair[1].key);
    }
    // Every duplicate of a key arrives in one group.
    let total: usize = groups.iter().map(|g| g.groups.iter().map(Vec::len).sum::<usize>()).sum();
    assert_eq!(total, 600);
    Ok(())
}

#[test]
fn descending_sources_merge_descending() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    let meta = |n| kv_meta(n, 1).with_key_order(KeyOrder::Descending);
    write_kv(&a, meta(2), vec![kv("a", "1"), kv("c", "3"), kv("e", "5")]);
    write_kv(&b, meta(4), vec![kv("b", "2"), kv("c", "33"), kv("d", "4")]);

    let source = SortedBucketSource::open(
        vec![BucketedInput::new(&a, kv_ops()), BucketedInput::new(&b, kv_ops())],
        JoinMode::FullOuter,
    )?;
    let keys: Vec<String> = source
        .iter()?
        .map(|g| g.map(|g| g.key.to_string()))
        .collect::<crate::Result<_>>()?;
    assert_eq!(keys, vec!["e", "d", "c", "b", "a"]);
    Ok(())
}

#[test]
fn reading_twice_is_identical() -> Result<()> {
    let dir = tempdir()?;
    let (a, b) = two_sources(dir.path());

    let first = join(&[&a, &b], JoinMode::FullOuter, TargetParallelism::Max)?;
    let second = join(&[&a, &b], JoinMode::FullOuter, TargetParallelism::Max)?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn duplicate_keys_delivered_together() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    write_json(&a, json_meta(2), vec![row(5, "a1"), row(5, "a2"), row(5, "a3")]);
    write_json(&b, json_meta(2), vec![row(5, "b1")]);

    let out = join(&[&a, &b], JoinMode::Inner, TargetParallelism::Max)?;
    assert_eq!(out, vec![(5, vec![s(&["a1", "a2", "a3"]), s(&["b1"])])]);
    Ok(())
}

// --------------------- Per-bucket units ---------------------

#[test]
fn read_bucket_covers_only_its_keys() -> Result<()> {
    let dir = tempdir()?;
    let (a, b) = two_sources(dir.path());
    let source = SortedBucketSource::open(
        vec![BucketedInput::new(&a, json_ops()), BucketedInput::new(&b, json_ops())],
        JoinMode::FullOuter,
    )?;
    assert_eq!(source.target_num_buckets(), 4);
    let meta = source.metadata(1).unwrap().clone();

    let mut seen = 0;
    for bucket in 0..source.target_num_buckets() {
        for group in source.read_bucket(bucket)? {
            let group = group?;
            assert_eq!(meta.bucket_id(&group.key), bucket);
            seen += 1;
        }
    }
    assert_eq!(seen, 3);
    assert!(source.read_bucket(4).is_err());
    Ok(())
}

#[test]
fn collect_parallel_matches_sequential() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    write_json(&a, json_meta(4), (0..100).map(|i| row(i, "a")).collect());
    write_json(&b, json_meta(8), (50..150).map(|i| row(i, "b")).collect());

    let source = SortedBucketSource::open(
        vec![BucketedInput::new(&a, json_ops()), BucketedInput::new(&b, json_ops())],
        JoinMode::FullOuter,
    )?;
    let per_bucket = source.collect_parallel()?;
    assert_eq!(per_bucket.len(), 8);

    for (bucket, groups) in per_bucket.iter().enumerate() {
        let sequential: Vec<CoGroup<JsonRecord>> =
            source.read_bucket(bucket as u32)?.collect::<crate::Result<_>>()?;
        assert_eq!(groups, &sequential);
    }

    let mut keys: Vec<i64> = per_bucket.iter().flatten().map(int_key).collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..150).collect::<Vec<_>>());
    Ok(())
}

// --------------------- Projection / predicate ---------------------

#[test]
fn projection_keeps_key_field() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    write_json(
        &a,
        json_meta(2),
        vec![JsonRecord(serde_json::json!({ "id": 1, "v": "a", "extra": true }))],
    );

    let input = BucketedInput::new(&a, json_ops()).with_projection(Projection::new(["v"]));
    let source = SortedBucketSource::open(vec![input], JoinMode::Inner)?;
    let groups: Vec<CoGroup<JsonRecord>> = source.iter()?.collect::<crate::Result<_>>()?;

    assert_eq!(groups.len(), 1);
    let record = &groups[0].group(0)[0];
    assert_eq!(record.0, serde_json::json!({ "id": 1, "v": "a" }));
    Ok(())
}

#[test]
fn projection_keeps_nested_key_parent() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    let meta = BucketMetadata::new(2, 1, KeyType::Int64, "user.id", HashType::Xxh3)?;
    let records = (1..=3)
        .map(|i| JsonRecord(serde_json::json!({ "user": { "id": i, "name": "n" }, "v": "a", "extra": i })))
        .collect();
    write_json(&a, meta, records);

    let input = BucketedInput::new(&a, json_ops()).with_projection(Projection::new(["v"]));
    let source = SortedBucketSource::open(vec![input], JoinMode::Inner)?;
    let groups: Vec<CoGroup<JsonRecord>> = source.iter()?.collect::<crate::Result<_>>()?;

    assert_eq!(groups.len(), 3);
    assert_eq!(groups.iter().map(int_key).collect::<Vec<_>>(), vec![1, 2, 3]);
    let record = &groups[0].group(0)[0];
    assert_eq!(record.0, serde_json::json!({ "user": { "id": 1, "name": "n" }, "v": "a" }));
    Ok(())
}

#[test]
fn predicate_filters_before_join() -> Result<()> {
    let dir = tempdir()?;
    let (a, b) = two_sources(dir.path());

    let inputs = vec![
        BucketedInput::new(&a, json_ops()),
        BucketedInput::new(&b, json_ops()).with_predicate(|r: &JsonRecord| r.0["v"] != "z"),
    ];
    let source = SortedBucketSource::open(inputs, JoinMode::Inner)?;
    let keys: Vec<i64> = source
        .iter()?
        .map(|g| g.map(|g| int_key(&g)))
        .collect::<crate::Result<_>>()?;
    assert_eq!(keys, vec![1]);
    Ok(())
}

// --------------------- Validation ---------------------

#[test]
fn unpublished_dataset_rejected() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("nothing-here");
    let err = SortedBucketSource::open(vec![BucketedInput::new(&path, kv_ops())], JoinMode::Inner)
        .err()
        .unwrap();
    assert!(matches!(err, SmbError::Unpublished { .. }));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    Ok(())
}

#[test]
fn incompatible_sources_named_in_error() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("xxh3-source");
    let b = dir.path().join("crc32-source");
    write_kv(&a, kv_meta(2, 1), vec![kv("a", "1")]);
    let crc = BucketMetadata::new(2, 1, KeyType::String, "key", HashType::Crc32)?;
    write_kv(&b, crc, vec![kv("a", "2")]);

    let err = SortedBucketSource::open(
        vec![BucketedInput::new(&a, kv_ops()), BucketedInput::new(&b, kv_ops())],
        JoinMode::Inner,
    )
    .err()
    .unwrap();

    match &err {
        SmbError::Incompatible { dimension, .. } => {
            assert!(matches!(dimension, Incompatibility::HashType { .. }))
        }
        other => panic!("unexpected error: {}", other),
    }
    let msg = err.to_string();
    assert!(msg.contains("xxh3-source") && msg.contains("crc32-source"), "{}", msg);
    assert_eq!(err.kind(), ErrorKind::Configuration);
    Ok(())
}

#[test]
fn key_type_mismatch_rejected() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    write_json(&a, json_meta(2), vec![row(1, "a")]);
    let strings = BucketMetadata::new(2, 1, KeyType::String, "v", HashType::Xxh3)?;
    write_json(&b, strings, vec![row(1, "a")]);

    let err = SortedBucketSource::open(
        vec![BucketedInput::new(&a, json_ops()), BucketedInput::new(&b, json_ops())],
        JoinMode::Inner,
    )
    .err()
    .unwrap();
    assert!(matches!(
        err,
        SmbError::Incompatible {
            dimension: Incompatibility::KeyType { .. },
            ..
        }
    ));
    Ok(())
}

#[test]
fn format_mismatch_rejected() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    write_kv(&a, kv_meta(2, 1), vec![kv("a", "1")]);

    let err = SortedBucketSource::open(vec![BucketedInput::new(&a, json_ops())], JoinMode::Inner)
        .err()
        .unwrap();
    assert!(matches!(err, SmbError::InvalidConfig(_)));
    Ok(())
}

#[test]
fn invalid_read_options_rejected() -> Result<()> {
    let dir = tempdir()?;
    let (a, _) = two_sources(dir.path());

    let none: Vec<BucketedInput<JsonRecord>> = Vec::new();
    assert!(SortedBucketSource::open(none, JoinMode::Inner).is_err());

    let err = SortedBucketSource::open(
        vec![BucketedInput::new(&a, json_ops())],
        JoinMode::Left { primary: 1 },
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    Ok(())
}

#[test]
fn single_source_order_matches_comparator() -> Result<()> {
    let dir = tempdir()?;
    let a = dir.path().join("a");
    write_json(&a, json_meta(4), vec![row(-5, "n"), row(7, "p"), row(0, "z"), row(-100, "m")]);

    let out = join(&[&a], JoinMode::Inner, TargetParallelism::Max)?;
    let keys: Vec<i64> = out.iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, vec![-100, -5, 0, 7]);
    assert!(keys.windows(2).all(|w| w[0].cmp(&w[1]) == Ordering::Less));
    Ok(())
}
