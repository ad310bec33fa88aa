//! Error types for tile launches.

use thiserror::Error;

/// Result type for host-level tile operations.
pub type Result<T> = std::result::Result<T, TileError>;

/// Error types that can occur while launching tiles.
///
/// Tile-level primitives ([`reduce`](crate::reduce), [`scan`](crate::scan),
/// [`BlockLocks`](crate::BlockLocks)) never produce these; only the host-side
/// launch layer does.
#[derive(Error, Debug)]
pub enum TileError {
    /// Tile dimension is zero or not a power of two.
    #[error("Invalid tile dimension {0}: must be a non-zero power of two")]
    InvalidTileDim(usize),

    /// The in-place partition was requested on a backend that cannot
    /// guarantee every resident tile eventually makes progress.
    #[error("Backend `{0}` does not guarantee forward progress across tiles")]
    NoForwardProgress(&'static str),

    /// The in-place partition needs every tile of its grid resident at once,
    /// and the grid is larger than the resident thread cap.
    #[error("Grid of {grid} tiles exceeds the resident limit of {max_resident_tiles}")]
    GridTooLarge {
        /// Tiles in the requested grid.
        grid: usize,
        /// Configured resident thread cap.
        max_resident_tiles: usize,
    },

    /// A tile panicked, or a worker for it could not be started.
    #[error("Kernel launch failed: {0}")]
    KernelLaunchFailed(String),

    /// Building the worker pool failed.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// A configuration value could not be parsed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
