//! Partition over whole sequences: both paths, every backend.

use std::sync::Arc;

use proptest::prelude::*;
use tile_sort::*;

fn is_partitioned<T>(data: &[T], split: usize, pred: impl Fn(&T) -> bool) -> bool {
    data[..split].iter().all(&pred) && !data[split..].iter().any(&pred)
}

fn same_multiset(mut a: Vec<i32>, mut b: Vec<i32>) -> bool {
    a.sort_unstable();
    b.sort_unstable();
    a == b
}

#[test]
fn test_partition_evens_example() {
    let mut data = vec![1, 2, 3, 4, 5, 6, 7, 8];
    let split = partition_execute::<8, _, _>(&mut data, |x| x % 2 == 0, &LaunchConfig::default()).unwrap();
    assert_eq!(split, 4);
    assert!(is_partitioned(&data, split, |x| x % 2 == 0));
    assert!(same_multiset(data, (1..=8).collect()));
}

#[test]
fn test_partition_all_or_nothing() {
    let original: Vec<i32> = (0..300).collect();

    let mut data = original.clone();
    let split = partition_execute::<32, _, _>(&mut data, |_| true, &LaunchConfig::default()).unwrap();
    assert_eq!(split, 300);
    assert!(same_multiset(data, original.clone()));

    let mut data = original.clone();
    let split = partition_execute::<32, _, _>(&mut data, |_| false, &LaunchConfig::default()).unwrap();
    assert_eq!(split, 0);
    assert!(same_multiset(data, original));
}

#[test]
fn test_partition_every_backend_and_strategy() {
    let original: Vec<i32> = (0..2000).map(|i| (i * 7919) % 2003 - 1000).collect();
    let pred = |x: &i32| *x < 0;
    let expected = original.iter().filter(|&x| pred(x)).count();

    for backend in [Backend::Serial, Backend::Pooled(3), Backend::Resident] {
        for strategy in [PartitionStrategy::Auto, PartitionStrategy::Buffered] {
            let config = LaunchConfig::default().with_backend(backend).with_partition(strategy);
            let mut data = original.clone();
            let split = partition_execute::<64, _, _>(&mut data, pred, &config).unwrap();
            assert_eq!(split, expected, "{backend} {strategy}");
            assert!(is_partitioned(&data, split, pred));
            assert!(same_multiset(data, original.clone()));
        }
    }
}

#[test]
fn test_in_place_writes_only_after_owner_read() {
    // Small tiles give many blocks, so runs regularly land in blocks whose
    // owner has not read them yet.
    let original: Vec<i32> = (0..1024).map(|i| (i * 389) % 1024).collect();
    for _ in 0..5 {
        let trace = Arc::new(Trace::new());
        let config = LaunchConfig::default()
            .with_backend(Backend::Resident)
            .with_partition(PartitionStrategy::InPlace)
            .with_trace(trace.clone());

        let mut data = original.clone();
        let split = partition_execute::<16, _, _>(&mut data, |x| x % 3 == 1, &config).unwrap();
        assert!(is_partitioned(&data, split, |x| x % 3 == 1));
        assert!(same_multiset(data, original.clone()));

        let violations = trace.ownership_violations();
        assert!(violations.is_empty(), "{violations:?}");

        // Every acquisition is matched by a release.
        let events = trace.events();
        let acquired = events.iter().filter(|e| matches!(e, TraceEvent::LockAcquired { .. })).count();
        let released = events.iter().filter(|e| matches!(e, TraceEvent::LockReleased { .. })).count();
        // Owners also release the lock they start with, without acquiring it.
        assert_eq!(released, acquired + 1024 / 16);
    }
}

#[test]
fn test_buffered_path_takes_no_locks() {
    let trace = Arc::new(Trace::new());
    let config = LaunchConfig::default()
        .with_partition(PartitionStrategy::Buffered)
        .with_trace(trace.clone());
    let mut data: Vec<i32> = (0..100).collect();
    let split = partition_execute::<8, _, _>(&mut data, |x| *x > 10, &config).unwrap();
    assert_eq!(split, 89);
    assert!(trace.is_empty());
}

#[test]
fn test_in_place_rejected_without_forward_progress() {
    for backend in [Backend::Serial, Backend::Pooled(0)] {
        let mut data = vec![3, 1, 2];
        let err = partition_in_place_execute::<4, _, _>(&mut data, |x| *x > 1, &LaunchConfig::default().with_backend(backend))
            .unwrap_err();
        assert!(matches!(err, TileError::NoForwardProgress(_)), "{err}");
        assert_eq!(data, vec![3, 1, 2]);
    }
}

#[test]
fn test_buffered_partition_partial_last_tile() {
    let mut data = vec![9, 2, 7, 4, 5];
    let split = partition_buffered_execute::<8, _, _>(&mut data, |x| *x < 5, &LaunchConfig::default()).unwrap();
    assert_eq!(split, 2);
    assert!(is_partitioned(&data, split, |x| *x < 5));
    assert!(same_multiset(data, vec![9, 2, 7, 4, 5]));
}

#[test]
fn test_default_config_partition_beyond_thread_limits() {
    // 50_000 tiles: `Auto` takes the buffered path on the capped resident backend.
    let original: Vec<i32> = (0..400_000).collect();
    let mut data = original.clone();
    let split = partition_execute::<8, _, _>(&mut data, |x| x % 2 == 0, &LaunchConfig::default()).unwrap();
    assert_eq!(split, 200_000);
    assert!(is_partitioned(&data, split, |x| x % 2 == 0));
    assert!(same_multiset(data, original));
}

#[test]
fn test_forced_in_place_over_resident_limit_is_rejected() {
    let mut data: Vec<i32> = (0..400_000).collect();
    let config = LaunchConfig::default().with_partition(PartitionStrategy::InPlace);
    let err = partition_execute::<8, _, _>(&mut data, |x| x % 2 == 0, &config).unwrap_err();
    assert!(matches!(err, TileError::GridTooLarge { grid: 50_000, .. }), "{err}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_in_place_partition_is_a_partition(
        original in prop::collection::vec(-1000i32..1000, 0..600),
        pivot in -1000i32..1000,
    ) {
        let mut data = original.clone();
        let config = LaunchConfig::default().with_partition(PartitionStrategy::InPlace);
        let split = partition_execute::<16, _, _>(&mut data, |x| *x < pivot, &config).unwrap();

        prop_assert_eq!(split, original.iter().filter(|&&x| x < pivot).count());
        prop_assert!(is_partitioned(&data, split, |x| *x < pivot));
        prop_assert!(same_multiset(data, original));
    }

    #[test]
    fn prop_buffered_matches_in_place_split(
        original in prop::collection::vec(any::<i32>(), 1..400),
    ) {
        let pred = |x: &i32| x.count_ones() % 2 == 0;
        let mut a = original.clone();
        let mut b = original;
        let buffered = LaunchConfig::default()
            .with_backend(Backend::Pooled(2))
            .with_partition(PartitionStrategy::Buffered);
        let in_place = LaunchConfig::default().with_partition(PartitionStrategy::InPlace);

        let split_a = partition_execute::<8, _, _>(&mut a, pred, &buffered).unwrap();
        let split_b = partition_execute::<8, _, _>(&mut b, pred, &in_place).unwrap();
        prop_assert_eq!(split_a, split_b);
        prop_assert!(same_multiset(a, b));
    }
}
