//! Partition kernels.
//!
//! Both kernels give each tile one chunk of the input. A tile flags which of
//! its elements satisfy the predicate, scans the flags to get every lane's
//! offset within its run, and reserves room for its two runs through the
//! shared [`Counters`]: satisfying elements grow forward from the start of the
//! output, the others grow backward from its end.
//!
//! The in-place kernel writes back into the input. A destination block may
//! belong to a tile that has not read its chunk yet, so every block starts
//! locked and is released by its owner right after the read; writers acquire
//! the blocks they touch before writing. The buffered kernel writes into a
//! separate output and needs no locks.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::kernels::lock::BlockLocks;
use crate::kernels::scan::scan;
use crate::memory::{blocks_spanned, GlobalView};
use crate::runtime::{Fence, Tile};
use crate::trace::TraceEvent;

/// Output cursors shared by every tile of a partition.
#[derive(Debug)]
pub struct Counters {
    true_cursor: AtomicUsize,
    false_cursor: AtomicUsize,
}

impl Counters {
    /// Cursors for an output of `len` elements.
    pub fn new(len: usize) -> Self {
        Self {
            true_cursor: AtomicUsize::new(0),
            false_cursor: AtomicUsize::new(len),
        }
    }

    /// Reserve `satisfying` slots at the front and `rest` slots at the back.
    ///
    /// Returns the base offsets of both ranges.
    pub fn reserve(&self, satisfying: usize, rest: usize) -> (usize, usize) {
        let true_base = self.true_cursor.fetch_add(satisfying, Ordering::AcqRel);
        let false_base = self.false_cursor.fetch_sub(rest, Ordering::AcqRel) - rest;
        (true_base, false_base)
    }

    /// Number of satisfying slots handed out so far; after every tile has
    /// reserved, the split index.
    pub fn split(&self) -> usize {
        self.true_cursor.load(Ordering::Acquire)
    }

    /// Number of slots not handed out yet.
    pub fn unassigned(&self) -> usize {
        self.false_cursor.load(Ordering::Acquire) - self.true_cursor.load(Ordering::Acquire)
    }
}

/// Per-tile result of flagging and scanning a chunk.
struct Runs<T, const N: usize> {
    values: [Option<T>; N],
    hits: [bool; N],
    true_offsets: [u32; N],
    false_offsets: [u32; N],
    true_count: usize,
    false_count: usize,
}

/// Flag the loaded lanes and scan both flag arrays.
fn flag_and_scan<T, P, const N: usize>(
    tile: &Tile<'_, N>,
    values: [Option<T>; N],
    predicate: &P,
) -> Runs<T, N>
where
    T: Copy,
    P: Fn(&T) -> bool,
{
    let mut hits = [false; N];
    let mut true_offsets = [0u32; N];
    let mut false_offsets = [0u32; N];
    tile.for_each_lane(|lane| {
        if let Some(value) = &values[lane] {
            hits[lane] = predicate(value);
            true_offsets[lane] = u32::from(hits[lane]);
            false_offsets[lane] = u32::from(!hits[lane]);
        }
    });
    tile.barrier(Fence::TileStatic);

    let true_count = scan(tile, &mut true_offsets) as usize;
    let false_count = scan(tile, &mut false_offsets) as usize;

    Runs {
        values,
        hits,
        true_offsets,
        false_offsets,
        true_count,
        false_count,
    }
}

/// Reserve output ranges for both runs; returns their bases.
fn reserve<T, const N: usize>(tile: &Tile<'_, N>, counters: &Counters, runs: &Runs<T, N>) -> (usize, usize) {
    let bases = tile.leader(|| counters.reserve(runs.true_count, runs.false_count));
    tile.barrier(Fence::TileStatic);
    bases
}

/// Write one run into `out`, holding the locks of every block it touches.
fn write_run<T, const N: usize>(
    tile: &Tile<'_, N>,
    out: GlobalView<'_, T>,
    locks: &BlockLocks,
    base: usize,
    count: usize,
    runs: &Runs<T, N>,
    satisfying: bool,
) where
    T: Copy,
{
    let Some((first, last)) = blocks_spanned(base, count, N) else {
        return;
    };

    // Ascending order: two tiles never wait on each other's held blocks.
    for block in first..=last {
        locks.acquire(tile, block);
        tile.trace(TraceEvent::BlockWrite {
            tile: tile.index(),
            block,
        });
    }

    scatter(tile, out, base, runs, satisfying);
    tile.barrier(Fence::Global);

    for block in first..=last {
        locks.release(tile, block);
    }
}

/// Every lane whose element belongs to the run writes it at `base + offset`.
fn scatter<T, const N: usize>(tile: &Tile<'_, N>, out: GlobalView<'_, T>, base: usize, runs: &Runs<T, N>, satisfying: bool)
where
    T: Copy,
{
    let offsets = if satisfying {
        &runs.true_offsets
    } else {
        &runs.false_offsets
    };
    tile.for_each_lane(|lane| match runs.values[lane] {
        Some(value) if runs.hits[lane] == satisfying => {
            // Safety: the reserved range [base, base + count) belongs to this
            // tile alone, and the caller holds the locks of its blocks.
            unsafe { out.write(base + offsets[lane] as usize, value) };
        }
        _ => {}
    });
}

/// In-place partition body for one tile.
///
/// `locks` must have one entry per tile, all initially held; `counters` must
/// be fresh for `range.len()`.
pub fn partition_in_place_tile<T, P, const N: usize>(
    tile: &Tile<'_, N>,
    range: GlobalView<'_, T>,
    locks: &BlockLocks,
    counters: &Counters,
    predicate: &P,
) where
    T: Copy,
    P: Fn(&T) -> bool,
{
    let mut values: [Option<T>; N] = [None; N];
    tile.for_each_lane(|lane| {
        if tile.contains(lane) {
            // Safety: the block is still locked, no other tile writes it.
            values[lane] = Some(unsafe { range.read(tile.global(lane)) });
        }
    });
    tile.barrier(Fence::Global);
    tile.trace(TraceEvent::BlockRead {
        tile: tile.index(),
        block: tile.index(),
    });

    // The chunk is in registers now: other tiles may overwrite the block.
    locks.release(tile, tile.index());

    let runs = flag_and_scan(tile, values, predicate);
    let (true_base, false_base) = reserve(tile, counters, &runs);

    write_run(tile, range, locks, true_base, runs.true_count, &runs, true);
    write_run(tile, range, locks, false_base, runs.false_count, &runs, false);
}

/// Buffered partition body for one tile: reads `input`, writes `output`.
pub fn partition_buffered_tile<T, P, const N: usize>(
    tile: &Tile<'_, N>,
    input: &[T],
    output: GlobalView<'_, T>,
    counters: &Counters,
    predicate: &P,
) where
    T: Copy,
    P: Fn(&T) -> bool,
{
    let mut values: [Option<T>; N] = [None; N];
    tile.for_each_lane(|lane| {
        values[lane] = input.get(tile.global(lane)).copied();
    });

    let runs = flag_and_scan(tile, values, predicate);
    let (true_base, false_base) = reserve(tile, counters, &runs);

    scatter(tile, output, true_base, &runs, true);
    scatter(tile, output, false_base, &runs, false);
    tile.barrier(Fence::Global);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::with_tile;

    #[test]
    fn test_counters_reserve() {
        let counters = Counters::new(10);
        assert_eq!(counters.reserve(3, 2), (0, 8));
        assert_eq!(counters.reserve(1, 4), (3, 4));
        assert_eq!(counters.split(), 4);
        assert_eq!(counters.unassigned(), 0);
    }

    #[test]
    fn test_single_tile_in_place() {
        let mut data = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let locks = BlockLocks::locked(1);
        let counters = Counters::new(data.len());
        let view = GlobalView::new(&mut data);
        with_tile::<8, _, _>(8, |tile| {
            partition_in_place_tile(tile, view, &locks, &counters, &|x: &i32| x % 2 == 0)
        });
        assert_eq!(counters.split(), 4);
        assert!(!locks.is_locked(0));
        assert_eq!(data, vec![2, 4, 6, 8, 1, 3, 5, 7]);
    }

    #[test]
    fn test_single_tile_buffered_partial() {
        let input = vec![9, 2, 7, 4, 5];
        let mut output = vec![0; 5];
        let counters = Counters::new(input.len());
        with_tile::<8, _, _>(5, |tile| {
            partition_buffered_tile(tile, &input, GlobalView::new(&mut output), &counters, &|x: &i32| *x < 5)
        });
        assert_eq!(counters.split(), 2);
        assert_eq!(output, vec![2, 4, 9, 7, 5]);
    }
}
