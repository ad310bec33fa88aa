//! Tile-parallel reduce, scan and partition primitives.
//!
//! Work is organised the way a GPU compute kernel sees it: a launch runs a
//! grid of tiles, and every tile is `N` lanes executing in lockstep that share
//! a scratch array and synchronise at barriers. Tiles are scheduled by a
//! [`Backend`]: serially, on a rayon pool, or each on its own thread.
//!
//! Building blocks:
//!
//! - [`reduce`] / [`reduce_with`]: tree reduction of a tile's range.
//! - [`scan`] / [`scan_with`]: two-level exclusive scan of a tile's range.
//! - [`BlockLocks`]: per-block spinlocks acquired on behalf of a whole tile.
//! - [`partition_in_place_tile`] / [`partition_buffered_tile`]: the partition
//!   kernel bodies.
//!
//! The `*_execute` functions launch those kernels over whole sequences.
//!
//! # Examples
//!
//! ```rust
//! use tile_sort::{partition_execute, scan_execute, LaunchConfig};
//!
//! let config = LaunchConfig::default();
//!
//! let mut data = vec![3u32, 1, 4, 1, 5, 9, 2, 6];
//! let total = scan_execute::<8, _>(&mut data, &config)?;
//! assert_eq!(data, [0, 3, 4, 8, 9, 14, 23, 25]);
//! assert_eq!(total, 31);
//!
//! let mut data: Vec<i32> = (1..=100).collect();
//! let split = partition_execute::<16, _, _>(&mut data, |x| x % 3 == 0, &config)?;
//! assert_eq!(split, 33);
//! # Ok::<(), tile_sort::TileError>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod device;
pub mod error;
pub mod kernels;
pub mod memory;
pub mod ops;
pub mod runtime;
pub mod trace;


// Re-exports
pub use config::{LaunchConfig, PartitionStrategy, SpinPolicy};
pub use device::Backend;
pub use error::{Result, TileError};
pub use kernels::partition::{partition_buffered_tile, partition_in_place_tile};
pub use kernels::{padded_cols, reduce, reduce_with, scan, scan_with, BlockLocks, Counters};
pub use memory::GlobalView;
pub use ops::*;
pub use runtime::{check_tile_dim, launch, with_tile, Fence, LaunchState, Tile};
pub use trace::{OwnershipViolation, Trace, TraceEvent};
