//! Tile-wide exclusive scan.
//!
//! Two-level scan from Dotsenko, Govindaraju, Sloan, Boyd & Manferdelli (2008),
//! "Fast Scan Algorithms on Graphics Processors". The tile's range is viewed
//! as a matrix of `rows` rows with an odd number of columns, so that lanes
//! walking their rows in parallel hit distinct banks of the scratch memory.
//!
//! 1. Each row's lane reduces its row into a per-row sum.
//! 2. The row sums are exclusive-scanned (serially by the leader when there are
//!    few of them, otherwise by recursing with [`SUM_ROWS`] rows).
//! 3. Each row's lane re-walks its row seeded with the row's prefix.

use std::ops::Add;

use num_traits::Zero;

use crate::runtime::{Fence, Tile};

/// Number of banks of the tile scratch memory.
pub const LDS_BANKS: usize = 32;

/// Upper bound on the number of rows of the first level.
pub const MAX_ROWS: usize = 64;

/// Rows used when scanning an array of row sums; also the largest array of
/// row sums the leader scans serially.
pub const SUM_ROWS: usize = 8;

/// Column count for viewing `length` elements as `rows` rows.
///
/// The result is odd, hence co-prime with [`LDS_BANKS`], and
/// `rows * padded_cols(length, rows) >= length`.
pub fn padded_cols(length: usize, rows: usize) -> usize {
    let cols = length.div_ceil(rows);
    if cols % 2 == 1 {
        cols
    } else {
        cols + 1
    }
}

/// Serial fold of `data` into `init`, done by a single lane.
pub fn serial_accumulate<T, F>(data: &[T], init: T, op: F) -> T
where
    T: Copy,
    F: Fn(T, T) -> T,
{
    data.iter().fold(init, |acc, &x| op(acc, x))
}

/// Serial in-place exclusive scan seeded with `init`, done by a single lane.
///
/// Returns the combined total of `init` and every element.
pub fn serial_scan<T, F>(data: &mut [T], init: T, op: F) -> T
where
    T: Copy,
    F: Fn(T, T) -> T,
{
    let mut acc = init;
    for x in data.iter_mut() {
        let tmp = *x;
        *x = acc;
        acc = op(acc, tmp);
    }
    acc
}

fn row_bounds(row: usize, cols: usize, len: usize) -> (usize, usize) {
    let start = (row * cols).min(len);
    let end = (start + cols).min(len);
    (start, end)
}

/// Step 1: reduce each of the `sums.len()` rows of `data` into `sums`.
fn reduce_rows<T, F, const N: usize>(
    tile: &Tile<'_, N>,
    data: &[T],
    sums: &mut [T],
    identity: T,
    op: &F,
) where
    T: Copy,
    F: Fn(T, T) -> T,
{
    let rows = sums.len();
    let cols = padded_cols(data.len(), rows);
    tile.for_each_lane(|lane| {
        let mut row = lane;
        while row < rows {
            let (start, end) = row_bounds(row, cols, data.len());
            sums[row] = serial_accumulate(&data[start..end], identity, op);
            row += N;
        }
    });
}

/// Step 3: exclusive-scan each row of `data` seeded with its row prefix.
fn scan_rows<T, F, const N: usize>(tile: &Tile<'_, N>, data: &mut [T], prefixes: &[T], op: &F)
where
    T: Copy,
    F: Fn(T, T) -> T,
{
    let rows = prefixes.len();
    let cols = padded_cols(data.len(), rows);
    let len = data.len();
    tile.for_each_lane(|lane| {
        let mut row = lane;
        while row < rows {
            let (start, end) = row_bounds(row, cols, len);
            serial_scan(&mut data[start..end], prefixes[row], op);
            row += N;
        }
    });
}

/// Step 2: exclusive scan of the row sums.
fn scan_sums<T, F, const N: usize>(tile: &Tile<'_, N>, sums: &mut [T], identity: T, op: &F)
where
    T: Copy,
    F: Fn(T, T) -> T,
{
    if sums.len() <= SUM_ROWS {
        tile.leader(|| serial_scan(sums, identity, op));
        return;
    }

    let mut inner = [identity; SUM_ROWS];
    reduce_rows(tile, sums, &mut inner, identity, op);
    tile.barrier(Fence::TileStatic);

    scan_sums(tile, &mut inner, identity, op);
    tile.barrier(Fence::TileStatic);

    scan_rows(tile, sums, &inner, op);
}

/// Exclusive prefix sum of `data`, in place. Returns the sum of all elements.
///
/// The input values are overwritten. An empty range is left untouched and
/// zero is returned.
///
/// # Example
///
/// ```
/// use tile_sort::{scan, with_tile};
///
/// let mut data = [3, 1, 4, 1, 5, 9, 2, 6];
/// let total = with_tile::<8, _, _>(data.len(), |tile| scan(tile, &mut data));
/// assert_eq!(data, [0, 3, 4, 8, 9, 14, 23, 25]);
/// assert_eq!(total, 31);
/// ```
pub fn scan<T, const N: usize>(tile: &Tile<'_, N>, data: &mut [T]) -> T
where
    T: Copy + Zero + Add<Output = T>,
{
    scan_with(tile, data, T::zero(), |a, b| a + b)
}

/// Exclusive prefix combine of `data` under `op`, in place.
///
/// `op` must be associative and `identity` must be its identity element:
/// `data[0]` becomes `identity` and `data[i]` becomes
/// `op(...op(op(identity, x0), x1)..., x(i-1))`. Returns the combination of
/// every element. An empty range is left untouched and `identity` returned.
pub fn scan_with<T, F, const N: usize>(tile: &Tile<'_, N>, data: &mut [T], identity: T, op: F) -> T
where
    T: Copy,
    F: Fn(T, T) -> T,
{
    let Some(&last) = data.last() else {
        return identity;
    };

    let mut sums = [identity; MAX_ROWS];
    let sums = &mut sums[..N.min(MAX_ROWS)];

    reduce_rows(tile, data, sums, identity, &op);
    tile.barrier(Fence::TileStatic);

    scan_sums(tile, sums, identity, &op);
    tile.barrier(Fence::TileStatic);

    scan_rows(tile, data, sums, &op);
    tile.barrier(Fence::TileStatic);

    op(data[data.len() - 1], last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::with_tile;

    fn reference_exclusive(input: &[u64]) -> (Vec<u64>, u64) {
        let mut out = Vec::with_capacity(input.len());
        let mut acc = 0;
        for &x in input {
            out.push(acc);
            acc += x;
        }
        (out, acc)
    }

    #[test]
    fn test_padded_cols_is_odd_and_covers() {
        for rows in [1usize, 2, 8, 32, 64] {
            for length in 1..600usize {
                let cols = padded_cols(length, rows);
                assert_eq!(cols % 2, 1, "length {length} rows {rows}");
                assert!(rows * cols >= length, "length {length} rows {rows}");
            }
        }
        assert_eq!(padded_cols(64, 64), 1);
        assert_eq!(padded_cols(128, 64), 3);
        assert_eq!(padded_cols(64, 8), 9);
    }

    #[test]
    fn test_scan_example() {
        let mut data = [3u32, 1, 4, 1, 5, 9, 2, 6];
        let total = with_tile::<8, _, _>(8, |tile| scan(tile, &mut data));
        assert_eq!(data, [0, 3, 4, 8, 9, 14, 23, 25]);
        assert_eq!(total, 31);
        // last output + last input recovers the total
        assert_eq!(data[7] + 6, total);
    }

    #[test]
    fn test_scan_matches_reference_across_shapes() {
        for len in 1..300usize {
            let input: Vec<u64> = (0..len as u64).map(|i| (i * 7 + 3) % 11).collect();
            let (expected, expected_total) = reference_exclusive(&input);

            let mut data = input.clone();
            let total = with_tile::<64, _, _>(len, |tile| scan(tile, &mut data));
            assert_eq!(data, expected, "tile 64, len {len}");
            assert_eq!(total, expected_total);

            // Wide tiles scan 64 rows of sums, which recurses.
            let mut data = input.clone();
            let total = with_tile::<256, _, _>(len, |tile| scan(tile, &mut data));
            assert_eq!(data, expected, "tile 256, len {len}");
            assert_eq!(total, expected_total);

            let mut data = input;
            let total = with_tile::<4, _, _>(len, |tile| scan(tile, &mut data));
            assert_eq!(data, expected, "tile 4, len {len}");
            assert_eq!(total, expected_total);
        }
    }

    #[test]
    fn test_scan_destroys_input() {
        let original = [5u32, 5, 5, 5];
        let mut data = original;
        with_tile::<4, _, _>(4, |tile| scan(tile, &mut data));
        assert_ne!(data, original);

        // Scanning the output again does not give back the first result.
        let first = data;
        with_tile::<4, _, _>(4, |tile| scan(tile, &mut data));
        assert_ne!(data, first);
    }

    #[test]
    fn test_scan_empty_is_noop() {
        let mut data: [u32; 0] = [];
        let total = with_tile::<8, _, _>(0, |tile| scan(tile, &mut data));
        assert_eq!(total, 0);
    }

    #[test]
    fn test_scan_with_max_identity() {
        let mut data = [3i32, -1, 7, 2, 9, 4];
        let total = with_tile::<8, _, _>(6, |tile| scan_with(tile, &mut data, i32::MIN, i32::max));
        assert_eq!(data, [i32::MIN, 3, 3, 7, 7, 9]);
        assert_eq!(total, 9);
    }

    #[test]
    fn test_scan_with_non_commutative_op() {
        // 2x2 matrix product modulo a prime, associative but not commutative.
        type M = [u64; 4];
        const P: u64 = 1_000_003;
        fn mul(a: M, b: M) -> M {
            [
                (a[0] * b[0] + a[1] * b[2]) % P,
                (a[0] * b[1] + a[1] * b[3]) % P,
                (a[2] * b[0] + a[3] * b[2]) % P,
                (a[2] * b[1] + a[3] * b[3]) % P,
            ]
        }
        let id: M = [1, 0, 0, 1];
        let input: Vec<M> = (0..150u64).map(|i| [1, i % 3, i % 2, 1]).collect();

        let mut expected = Vec::new();
        let mut acc = id;
        for &m in &input {
            expected.push(acc);
            acc = mul(acc, m);
        }

        let mut data = input;
        let total = with_tile::<128, _, _>(150, |tile| scan_with(tile, &mut data, id, mul));
        assert_eq!(data, expected);
        assert_eq!(total, acc);
    }

    #[test]
    fn test_serial_helpers() {
        assert_eq!(serial_accumulate(&[1, 2, 3], 10, |a, b| a + b), 16);
        let mut data = [1, 2, 3];
        assert_eq!(serial_scan(&mut data, 0, |a, b| a + b), 6);
        assert_eq!(data, [0, 1, 3]);
    }
}
