//! Block-granularity spinlocks.
//!
//! A block is one tile-sized chunk of the output sequence. Only the leader
//! lane of a tile touches the lock flag; the rest of the tile waits at the
//! global barrier that follows, so every lane sees the lock as held (or
//! released) before going on.
//!
//! Tiles that spin depend on the tile holding the lock being scheduled. On a
//! backend without forward progress across tiles this can stall forever; see
//! [`Backend::guarantees_forward_progress`](crate::Backend::guarantees_forward_progress).

use std::hint;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use crate::config::SpinPolicy;
use crate::runtime::{Fence, Tile};
use crate::trace::TraceEvent;

/// Flag value of a free block.
pub const UNLOCKED: u32 = 0;

/// Flag value of a held block.
pub const LOCKED: u32 = 1;

/// Lock table: one flag per output block.
#[derive(Debug)]
pub struct BlockLocks {
    flags: Vec<AtomicU32>,
}

impl BlockLocks {
    /// Create a table of `blocks` free locks.
    pub fn new(blocks: usize) -> Self {
        Self::filled(blocks, UNLOCKED)
    }

    /// Create a table of `blocks` locks that all start held.
    ///
    /// The in-place partition starts this way: each block is held on behalf
    /// of its owning tile until that tile has read it.
    pub fn locked(blocks: usize) -> Self {
        Self::filled(blocks, LOCKED)
    }

    fn filled(blocks: usize, value: u32) -> Self {
        Self {
            flags: (0..blocks).map(|_| AtomicU32::new(value)).collect(),
        }
    }

    /// Number of blocks covered.
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Whether `block` is currently held.
    pub fn is_locked(&self, block: usize) -> bool {
        self.flags[block].load(Ordering::Acquire) == LOCKED
    }

    /// Acquire `block` on behalf of the whole tile.
    ///
    /// # Panics
    ///
    /// Panics if `block` is out of range, or if the launch is aborted while
    /// the leader is spinning.
    pub fn acquire<const N: usize>(&self, tile: &Tile<'_, N>, block: usize) {
        tile.leader(|| {
            let flag = &self.flags[block];
            let mut backoff = Backoff::new(tile.state().spin());
            while flag
                .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                if tile.state().is_aborted() {
                    panic!("launch aborted while tile {} waited on block {block}", tile.index());
                }
                backoff.snooze();
            }
            tracing::trace!(tile = tile.index(), block, "block acquired");
            tile.trace(TraceEvent::LockAcquired {
                tile: tile.index(),
                block,
            });
        });
        tile.barrier(Fence::Global);
    }

    /// Release `block` on behalf of the whole tile.
    ///
    /// # Panics
    ///
    /// Panics if `block` is out of range.
    pub fn release<const N: usize>(&self, tile: &Tile<'_, N>, block: usize) {
        tile.leader(|| {
            tile.trace(TraceEvent::LockReleased {
                tile: tile.index(),
                block,
            });
            self.flags[block].swap(UNLOCKED, Ordering::Release);
        });
        tile.barrier(Fence::Global);
    }
}

/// Exponential backoff state for one spin.
struct Backoff {
    shift: u32,
    max_shift: u32,
}

impl Backoff {
    fn new(policy: SpinPolicy) -> Self {
        Self {
            shift: 0,
            max_shift: policy.max_spin_shift,
        }
    }

    fn snooze(&mut self) {
        if self.shift <= self.max_shift {
            for _ in 0..(1u32 << self.shift.min(31)) {
                hint::spin_loop();
            }
            self.shift += 1;
        } else {
            thread::yield_now();
        }
    }
}
