//! Launch configuration.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::device::{Backend, PoolCache};
use crate::error::{Result, TileError};
use crate::trace::Trace;

/// Environment variable selecting the [`Backend`].
pub const BACKEND_ENV: &str = "TILE_SORT_BACKEND";

/// Environment variable selecting the [`PartitionStrategy`].
pub const PARTITION_ENV: &str = "TILE_SORT_PARTITION";

/// Default cap on the number of OS threads of the resident backend, which is
/// also the largest grid the in-place partition runs.
pub const DEFAULT_MAX_RESIDENT_TILES: usize = 1024;

/// Which partition path to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionStrategy {
    /// In-place when the backend guarantees forward progress and the grid fits
    /// within `max_resident_tiles`, buffered otherwise.
    #[default]
    Auto,
    /// Lock-mediated in-place partition. Requires a backend that guarantees
    /// forward progress across tiles.
    InPlace,
    /// Write into an auxiliary buffer, then copy back. Safe on every backend.
    Buffered,
}

impl fmt::Display for PartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PartitionStrategy::Auto => "auto",
            PartitionStrategy::InPlace => "in-place",
            PartitionStrategy::Buffered => "buffered",
        })
    }
}

impl FromStr for PartitionStrategy {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(PartitionStrategy::Auto),
            "in-place" | "inplace" | "in_place" => Ok(PartitionStrategy::InPlace),
            "buffered" => Ok(PartitionStrategy::Buffered),
            other => Err(TileError::InvalidConfig(format!(
                "unknown partition strategy `{other}`"
            ))),
        }
    }
}

/// Bounded exponential backoff for the block-lock spin.
///
/// A failed compare-exchange is followed by `2^k` spin-loop hints, `k`
/// growing by one per failure up to `max_spin_shift`; past that the spinning
/// thread yields to the OS scheduler on every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinPolicy {
    /// Largest exponent of the spin-hint burst.
    pub max_spin_shift: u32,
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self { max_spin_shift: 6 }
    }
}

/// Configuration shared by every tile of a launch.
///
/// # Examples
///
/// ```
/// use tile_sort::{Backend, LaunchConfig, PartitionStrategy};
///
/// let config = LaunchConfig::default()
///     .with_backend(Backend::Pooled(4))
///     .with_partition(PartitionStrategy::Buffered);
/// assert_eq!(config.backend, Backend::Pooled(4));
/// ```
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// How tiles are scheduled.
    pub backend: Backend,
    /// Which partition path [`partition_execute`](crate::partition_execute) takes.
    pub partition: PartitionStrategy,
    /// Spin policy of the block locks.
    pub spin: SpinPolicy,
    /// Thread cap of [`Backend::Resident`]. Grids up to this size get one
    /// thread per tile and may run the in-place partition; bigger grids share
    /// the threads and use the buffered path.
    pub max_resident_tiles: usize,
    /// Optional instrumentation sink.
    pub trace: Option<Arc<Trace>>,
    pub(crate) pools: PoolCache,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            partition: PartitionStrategy::default(),
            spin: SpinPolicy::default(),
            max_resident_tiles: DEFAULT_MAX_RESIDENT_TILES,
            trace: None,
            pools: PoolCache::default(),
        }
    }
}

impl LaunchConfig {
    /// Build a configuration from `TILE_SORT_BACKEND` and
    /// `TILE_SORT_PARTITION`, falling back to the defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(backend) = std::env::var(BACKEND_ENV) {
            config.backend = backend.parse()?;
        }
        if let Ok(partition) = std::env::var(PARTITION_ENV) {
            config.partition = partition.parse()?;
        }
        Ok(config)
    }

    /// Set the backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the partition strategy.
    pub fn with_partition(mut self, partition: PartitionStrategy) -> Self {
        self.partition = partition;
        self
    }

    /// Set the spin policy.
    pub fn with_spin(mut self, spin: SpinPolicy) -> Self {
        self.spin = spin;
        self
    }

    /// Set the resident thread cap.
    pub fn with_max_resident_tiles(mut self, tiles: usize) -> Self {
        self.max_resident_tiles = tiles;
        self
    }

    /// Attach an instrumentation trace.
    pub fn with_trace(mut self, trace: Arc<Trace>) -> Self {
        self.trace = Some(trace);
        self
    }
}
