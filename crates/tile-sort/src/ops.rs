//! Host-level operations.
//!
//! This module launches grids of tiles running the kernels over whole
//! sequences of arbitrary length.

use std::ops::{Add, AddAssign};

use num_traits::Zero;

use crate::config::{LaunchConfig, PartitionStrategy};
use crate::error::{Result, TileError};
use crate::kernels::lock::BlockLocks;
use crate::kernels::partition::{partition_buffered_tile, partition_in_place_tile, Counters};
use crate::kernels::reduction::reduce;
use crate::kernels::scan::scan_with;
use crate::memory::{tile_count, GlobalView};
use crate::runtime::{check_tile_dim, launch};

/// Sum every element of `data` using tiles of `N` lanes.
///
/// Each tile reduces its zero-padded chunk; the per-tile partial sums are
/// reduced the same way until one value is left. `data` is not modified.
/// Returns zero for an empty input.
///
/// # Example
///
/// ```
/// use tile_sort::{reduce_execute, LaunchConfig};
///
/// let data: Vec<u64> = (1..=1000).collect();
/// let sum = reduce_execute::<64, _>(&data, &LaunchConfig::default())?;
/// assert_eq!(sum, 500_500);
/// # Ok::<(), tile_sort::TileError>(())
/// ```
pub fn reduce_execute<const N: usize, T>(data: &[T], config: &LaunchConfig) -> Result<T>
where
    T: Copy + Zero + AddAssign + Send + Sync,
{
    check_tile_dim::<N>()?;
    if data.is_empty() {
        return Ok(T::zero());
    }

    let mut partials = data.to_vec();
    while partials.len() > 1 {
        let mut next = vec![T::zero(); tile_count(partials.len(), N)];
        {
            let input = &partials;
            let out = GlobalView::new(&mut next);
            launch::<N, _>(config, input.len(), |tile| {
                let mut chunk = [T::zero(); N];
                let start = tile.origin();
                let end = (start + N).min(input.len());
                chunk[..end - start].copy_from_slice(&input[start..end]);

                let slot = reduce(tile, &mut chunk);
                let total = chunk[slot];
                // Safety: slot `tile.index()` is written by this tile only.
                tile.leader(|| unsafe { out.write(tile.index(), total) });
            })?;
        }
        partials = next;
    }
    Ok(partials[0])
}

/// Exclusive prefix sum of `data` in place using tiles of `N` lanes.
///
/// Returns the sum of all elements; an empty input is untouched and zero is
/// returned.
///
/// # Example
///
/// ```
/// use tile_sort::{scan_execute, LaunchConfig};
///
/// let mut data = vec![1u32; 300];
/// let total = scan_execute::<64, _>(&mut data, &LaunchConfig::default())?;
/// assert_eq!(total, 300);
/// assert_eq!(data[299], 299);
/// # Ok::<(), tile_sort::TileError>(())
/// ```
pub fn scan_execute<const N: usize, T>(data: &mut [T], config: &LaunchConfig) -> Result<T>
where
    T: Copy + Zero + Add<Output = T> + Send + Sync,
{
    scan_with_execute::<N, _, _>(data, T::zero(), |a, b| a + b, config)
}

/// Exclusive prefix combine of `data` under `op` in place, using tiles of `N`
/// lanes.
///
/// `op` must be associative with `identity` as its identity. Three phases:
/// every tile scans its chunk and publishes the chunk total; the totals are
/// scanned recursively; every tile folds its chunk's prefix into its elements.
/// Returns the combination of all elements (`identity` for an empty input).
pub fn scan_with_execute<const N: usize, T, F>(
    data: &mut [T],
    identity: T,
    op: F,
    config: &LaunchConfig,
) -> Result<T>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    check_tile_dim::<N>()?;
    scan_levels::<N, T, F>(data, identity, &op, config)
}

/// One level of the device-wide scan; recurses on the tile totals.
fn scan_levels<const N: usize, T, F>(
    data: &mut [T],
    identity: T,
    op: &F,
    config: &LaunchConfig,
) -> Result<T>
where
    T: Copy + Send + Sync,
    F: Fn(T, T) -> T + Sync,
{
    let len = data.len();
    if len == 0 {
        return Ok(identity);
    }

    let grid = tile_count(len, N);
    let mut totals = vec![identity; grid];
    {
        let view = GlobalView::new(data);
        let totals_view = GlobalView::new(&mut totals);
        launch::<N, _>(config, len, |tile| {
            let start = tile.origin();
            let count = tile.active_lanes();
            let mut chunk = [identity; N];
            tile.for_each_lane(|lane| {
                if lane < count {
                    // Safety: each tile only touches its own chunk.
                    chunk[lane] = unsafe { view.read(start + lane) };
                }
            });

            let total = scan_with(tile, &mut chunk[..count], identity, op);

            tile.for_each_lane(|lane| {
                if lane < count {
                    unsafe { view.write(start + lane, chunk[lane]) };
                }
            });
            tile.leader(|| unsafe { totals_view.write(tile.index(), total) });
        })?;
    }

    if grid == 1 {
        return Ok(totals[0]);
    }

    let total = scan_levels::<N, T, F>(&mut totals, identity, op, config)?;

    let view = GlobalView::new(data);
    launch::<N, _>(config, len, |tile| {
        let prefix = totals[tile.index()];
        tile.for_each_lane(|lane| {
            if tile.contains(lane) {
                let i = tile.global(lane);
                // Safety: each tile only touches its own chunk.
                unsafe { view.write(i, op(prefix, view.read(i))) };
            }
        });
    })?;

    Ok(total)
}

/// Partition `data` in place so that every element satisfying `predicate`
/// comes first, using tiles of `N` lanes. Returns the number of satisfying
/// elements.
///
/// Relative order within each side is not preserved. The path is chosen by
/// `config.partition`; see [`PartitionStrategy`].
///
/// # Errors
///
/// [`TileError::NoForwardProgress`] or [`TileError::GridTooLarge`] if the
/// in-place path is requested where it cannot run safely, or a launch error.
///
/// # Example
///
/// ```
/// use tile_sort::{partition_execute, LaunchConfig};
///
/// let mut data = vec![1, 2, 3, 4, 5, 6, 7, 8];
/// let split = partition_execute::<8, _, _>(&mut data, |x| x % 2 == 0, &LaunchConfig::default())?;
/// assert_eq!(split, 4);
/// assert!(data[..4].iter().all(|x| x % 2 == 0));
/// # Ok::<(), tile_sort::TileError>(())
/// ```
pub fn partition_execute<const N: usize, T, P>(
    data: &mut [T],
    predicate: P,
    config: &LaunchConfig,
) -> Result<usize>
where
    T: Copy + Send + Sync,
    P: Fn(&T) -> bool + Sync,
{
    check_tile_dim::<N>()?;
    if data.is_empty() {
        return Ok(data.len());
    }

    let grid = tile_count(data.len(), N);
    match config.partition {
        PartitionStrategy::InPlace => partition_in_place_execute::<N, _, _>(data, predicate, config),
        PartitionStrategy::Buffered => partition_buffered_execute::<N, _, _>(data, predicate, config),
        PartitionStrategy::Auto => {
            if !config.backend.guarantees_forward_progress() {
                tracing::debug!(backend = %config.backend, "no forward progress, using buffered partition");
                partition_buffered_execute::<N, _, _>(data, predicate, config)
            } else if grid > config.max_resident_tiles {
                tracing::warn!(
                    grid,
                    max_resident_tiles = config.max_resident_tiles,
                    "grid exceeds resident limit, falling back to buffered partition"
                );
                partition_buffered_execute::<N, _, _>(data, predicate, config)
            } else {
                partition_in_place_execute::<N, _, _>(data, predicate, config)
            }
        }
    }
}

/// Lock-mediated in-place partition. Extra storage is one lock per tile and
/// two counters.
///
/// Every tile of the grid must make progress while others spin on its block,
/// so the backend must guarantee forward progress and the grid must fit
/// within `config.max_resident_tiles`.
pub fn partition_in_place_execute<const N: usize, T, P>(
    data: &mut [T],
    predicate: P,
    config: &LaunchConfig,
) -> Result<usize>
where
    T: Copy + Send + Sync,
    P: Fn(&T) -> bool + Sync,
{
    check_tile_dim::<N>()?;
    if data.is_empty() {
        return Ok(data.len());
    }
    if !config.backend.guarantees_forward_progress() {
        return Err(TileError::NoForwardProgress(config.backend.name()));
    }
    let len = data.len();
    let grid = tile_count(len, N);
    if grid > config.max_resident_tiles {
        return Err(TileError::GridTooLarge {
            grid,
            max_resident_tiles: config.max_resident_tiles,
        });
    }

    let locks = BlockLocks::locked(grid);
    let counters = Counters::new(len);
    let range = GlobalView::new(data);
    launch::<N, _>(config, len, |tile| {
        partition_in_place_tile(tile, range, &locks, &counters, &predicate)
    })?;

    let split = counters.split();
    tracing::debug!(len, split, "in-place partition done");
    Ok(split)
}

/// Partition through an auxiliary buffer of `data.len()` elements, then copy
/// back. Runs on any backend.
pub fn partition_buffered_execute<const N: usize, T, P>(
    data: &mut [T],
    predicate: P,
    config: &LaunchConfig,
) -> Result<usize>
where
    T: Copy + Send + Sync,
    P: Fn(&T) -> bool + Sync,
{
    check_tile_dim::<N>()?;
    if data.is_empty() {
        return Ok(data.len());
    }

    let len = data.len();
    let mut output = data.to_vec();
    let counters = Counters::new(len);
    {
        let input: &[T] = data;
        let out = GlobalView::new(&mut output);
        launch::<N, _>(config, len, |tile| {
            partition_buffered_tile(tile, input, out, &counters, &predicate)
        })?;
    }
    data.copy_from_slice(&output);

    let split = counters.split();
    tracing::debug!(len, split, "buffered partition done");
    Ok(split)
}
