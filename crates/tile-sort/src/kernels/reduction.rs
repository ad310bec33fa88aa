//! Tile-wide tree reduction.
//!
//! The active span starts as the whole range and halves every round. Lane `e`
//! folds the element one half-span below slot `last - e` into that slot, so
//! the partial results collect towards the end of the range and the total ends
//! up in the last slot.

use std::ops::AddAssign;

use crate::runtime::{Fence, Tile};

/// Sum `data` in place, leaving the total in its last slot.
///
/// Returns the index of the slot holding the total. An empty range is left
/// untouched and `data.len()` is returned.
///
/// The other slots hold partial sums afterwards.
///
/// # Example
///
/// ```
/// use tile_sort::{reduce, with_tile};
///
/// let mut data = [1, 2, 3, 4, 5, 6, 7, 8];
/// let slot = with_tile::<8, _, _>(data.len(), |tile| reduce(tile, &mut data));
/// assert_eq!(data[slot], 36);
/// ```
pub fn reduce<T, const N: usize>(tile: &Tile<'_, N>, data: &mut [T]) -> usize
where
    T: Copy + AddAssign,
{
    reduce_with(tile, data, |acc: &mut T, x: T| *acc += x)
}

/// Fold `data` in place with `op`, leaving the result in its last slot.
///
/// `op(acc, x)` combines `x` into `acc`. It must be associative and
/// commutative: slots are paired by distance, not by adjacency.
pub fn reduce_with<T, F, const N: usize>(tile: &Tile<'_, N>, data: &mut [T], op: F) -> usize
where
    T: Copy,
    F: Fn(&mut T, T),
{
    let len = data.len();
    if len == 0 {
        return len;
    }
    let last = len - 1;

    let mut span = len;
    while span > 1 {
        let m = span / 2;
        let stride = span - m;
        tile.for_each_lane(|lane| {
            let mut e = lane;
            while e < m {
                let src = data[last - e - stride];
                op(&mut data[last - e], src);
                e += N;
            }
        });
        tile.barrier(Fence::TileStatic);

        span = stride;
    }

    last
}
