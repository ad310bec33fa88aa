//! Globally addressable memory shared by the tiles of a launch.
//!
//! Tile scratch memory is plain local arrays owned by the tile's thread. Global
//! memory is a [`GlobalView`]: a view of a host slice that every tile can read
//! and write concurrently. Accesses are bounds-checked but not synchronized;
//! kernels order them through barriers, block locks and atomics.

use std::cell::UnsafeCell;
use std::marker::PhantomData;

/// A mutable range of elements addressable from every tile.
pub struct GlobalView<'a, T> {
    cells: *const UnsafeCell<T>,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// Safety: the view hands out copies of `T` across threads; callers of the
// unsafe accessors guarantee that no two tiles race on the same element.
unsafe impl<T: Send> Send for GlobalView<'_, T> {}
unsafe impl<T: Send> Sync for GlobalView<'_, T> {}

impl<T> Clone for GlobalView<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GlobalView<'_, T> {}

impl<'a, T: Copy> GlobalView<'a, T> {
    /// Borrow `data` for the duration of a launch.
    pub fn new(data: &'a mut [T]) -> Self {
        Self {
            // UnsafeCell<T> has the same layout as T.
            cells: data.as_mut_ptr() as *const UnsafeCell<T>,
            len: data.len(),
            _marker: PhantomData,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn cell(&self, index: usize) -> &UnsafeCell<T> {
        assert!(
            index < self.len,
            "global index {index} out of bounds for length {}",
            self.len
        );
        // Safety: index is in bounds and the borrow of the slice lives for 'a.
        unsafe { &*self.cells.add(index) }
    }

    /// Read the element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Safety
    ///
    /// No other tile may be writing `index` concurrently.
    pub unsafe fn read(&self, index: usize) -> T {
        *self.cell(index).get()
    }

    /// Write `value` at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    ///
    /// # Safety
    ///
    /// No other tile may be reading or writing `index` concurrently.
    pub unsafe fn write(&self, index: usize, value: T) {
        *self.cell(index).get() = value;
    }
}

/// Number of `tile_dim`-sized tiles (and output blocks) covering `len`
/// elements, padding the last one.
pub fn tile_count(len: usize, tile_dim: usize) -> usize {
    len.div_ceil(tile_dim)
}

/// `len` rounded up to a whole number of tiles.
pub fn padded_extent(len: usize, tile_dim: usize) -> usize {
    tile_count(len, tile_dim) * tile_dim
}

/// Inclusive range of `tile_dim`-sized blocks touched by `count` elements
/// starting at `base`, or `None` when `count` is zero.
pub fn blocks_spanned(base: usize, count: usize, tile_dim: usize) -> Option<(usize, usize)> {
    (count > 0).then(|| (base / tile_dim, (base + count - 1) / tile_dim))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_read_write() {
        let mut data = vec![1u32, 2, 3];
        {
            let view = GlobalView::new(&mut data);
            assert_eq!(view.len(), 3);
            unsafe {
                assert_eq!(view.read(1), 2);
                view.write(1, 20);
                assert_eq!(view.read(1), 20);
            }
        }
        assert_eq!(data, vec![1, 20, 3]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_view_bounds_checked() {
        let mut data = vec![0u8; 4];
        let view = GlobalView::new(&mut data);
        unsafe { view.write(4, 1) };
    }

    #[test]
    fn test_tiling() {
        assert_eq!(tile_count(0, 64), 0);
        assert_eq!(tile_count(64, 64), 1);
        assert_eq!(tile_count(65, 64), 2);
        assert_eq!(padded_extent(65, 64), 128);
        assert_eq!(padded_extent(0, 8), 0);
    }

    #[test]
    fn test_blocks_spanned() {
        assert_eq!(blocks_spanned(0, 0, 8), None);
        assert_eq!(blocks_spanned(0, 8, 8), Some((0, 0)));
        assert_eq!(blocks_spanned(6, 4, 8), Some((0, 1)));
        assert_eq!(blocks_spanned(15, 18, 8), Some((1, 4)));
    }
}
