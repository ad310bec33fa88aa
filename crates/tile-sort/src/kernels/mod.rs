//! Tile-level primitives and the partition kernels built from them.
//!
//! Everything in here runs inside a [`Tile`](crate::Tile): the functions take
//! the tile context as their first argument and have no error channel.

pub mod lock;
pub mod partition;
pub mod reduction;
pub mod scan;

// Re-export commonly used primitives
pub use lock::*;
pub use partition::Counters;
pub use reduction::*;
pub use scan::*;
