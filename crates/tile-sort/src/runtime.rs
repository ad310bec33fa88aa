//! Tile execution model.
//!
//! A launch covers an extent of `len` elements with `ceil(len / N)` tiles of
//! `N` lanes each. A tile runs on one host thread and executes its lanes in
//! lockstep: every lane finishes the current phase before the tile passes a
//! [`Tile::barrier`]. Lanes whose global index falls past the extent are inert.
//!
//! Tiles never synchronize with each other through barriers. Anything shared
//! between tiles goes through atomics (see [`BlockLocks`](crate::BlockLocks)).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{self, AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{LaunchConfig, SpinPolicy};
use crate::device::PoolCache;
use crate::error::{Result, TileError};
use crate::trace::{Trace, TraceEvent};

/// Visibility scope of a tile barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fence {
    /// Only the tile's own scratch memory must be consistent after the barrier.
    TileStatic,
    /// Writes to global memory and to the lock table must be visible to other
    /// tiles after the barrier.
    Global,
}

/// State shared by every tile of one launch.
#[derive(Debug)]
pub struct LaunchState {
    spin: SpinPolicy,
    max_resident_tiles: usize,
    pools: PoolCache,
    trace: Option<Arc<Trace>>,
    aborted: AtomicBool,
    failure: Mutex<Option<String>>,
}

impl Default for LaunchState {
    fn default() -> Self {
        Self::new(&LaunchConfig::default())
    }
}

impl LaunchState {
    pub(crate) fn new(config: &LaunchConfig) -> Self {
        Self {
            spin: config.spin,
            max_resident_tiles: config.max_resident_tiles,
            pools: config.pools.clone(),
            trace: config.trace.clone(),
            aborted: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    /// Largest number of OS threads the resident backend starts.
    pub fn max_resident_tiles(&self) -> usize {
        self.max_resident_tiles
    }

    pub(crate) fn pools(&self) -> &PoolCache {
        &self.pools
    }

    /// Spin policy for lock acquisition.
    pub fn spin(&self) -> SpinPolicy {
        self.spin
    }

    /// Whether some tile of this launch failed.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Mark the launch as failed. Only the first message is kept.
    pub(crate) fn fail(&self, message: String) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            tracing::warn!(%message, "tile launch aborted");
            *failure = Some(message);
        }
        self.aborted.store(true, Ordering::Release);
    }

    fn into_result(self) -> Result<()> {
        match self.failure.into_inner() {
            Some(message) => Err(TileError::KernelLaunchFailed(message)),
            None => Ok(()),
        }
    }
}

/// Execution context of one tile, passed to kernel bodies.
///
/// `N` is the number of lanes, a power of two fixed at compile time.
pub struct Tile<'a, const N: usize> {
    index: usize,
    grid: usize,
    extent: usize,
    state: &'a LaunchState,
}

impl<'a, const N: usize> Tile<'a, N> {
    /// Number of lanes in the tile.
    pub const DIM: usize = N;

    pub(crate) fn new(index: usize, grid: usize, extent: usize, state: &'a LaunchState) -> Self {
        Self {
            index,
            grid,
            extent,
            state,
        }
    }

    /// Index of this tile in the grid.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of tiles in the grid.
    pub fn grid(&self) -> usize {
        self.grid
    }

    /// Number of elements covered by the launch.
    pub fn extent(&self) -> usize {
        self.extent
    }

    /// Global index of the tile's lane 0.
    pub fn origin(&self) -> usize {
        self.index * N
    }

    /// Global index of `lane`.
    pub fn global(&self, lane: usize) -> usize {
        self.origin() + lane
    }

    /// Whether `lane` maps onto an element of the extent.
    pub fn contains(&self, lane: usize) -> bool {
        self.global(lane) < self.extent
    }

    /// Number of lanes of this tile that map onto the extent.
    pub fn active_lanes(&self) -> usize {
        self.extent.saturating_sub(self.origin()).min(N)
    }

    /// Run one phase: `f` is executed for every lane, in lane order.
    pub fn for_each_lane<F: FnMut(usize)>(&self, f: F) {
        (0..N).for_each(f);
    }

    /// Run `f` on the leader lane (lane 0) only.
    ///
    /// The other lanes do nothing in this phase; pair with a barrier before
    /// they read what the leader produced.
    pub fn leader<R, F: FnOnce() -> R>(&self, f: F) -> R {
        f()
    }

    /// Tile-wide rendezvous with the given fence scope.
    pub fn barrier(&self, fence: Fence) {
        match fence {
            Fence::TileStatic => atomic::compiler_fence(Ordering::SeqCst),
            Fence::Global => atomic::fence(Ordering::SeqCst),
        }
    }

    /// Shared state of the launch this tile belongs to.
    pub fn state(&self) -> &LaunchState {
        self.state
    }

    /// Record an instrumentation event if the launch carries a trace.
    pub fn trace(&self, event: TraceEvent) {
        if let Some(trace) = &self.state.trace {
            trace.record(event);
        }
    }
}

/// Validate that `N` is a usable tile dimension.
pub fn check_tile_dim<const N: usize>() -> Result<()> {
    if N.is_power_of_two() {
        Ok(())
    } else {
        Err(TileError::InvalidTileDim(N))
    }
}

/// Launch `ceil(extent / N)` tiles of `N` lanes running `body`.
///
/// Returns once every tile has finished. If a tile panics the launch is
/// aborted: tiles spinning on a lock unwind instead of waiting forever and the
/// first failure is returned as [`TileError::KernelLaunchFailed`].
///
/// # Example
///
/// ```
/// use tile_sort::{launch, LaunchConfig};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let lanes = AtomicUsize::new(0);
/// launch::<8, _>(&LaunchConfig::default(), 20, |tile| {
///     lanes.fetch_add(tile.active_lanes(), Ordering::Relaxed);
/// })?;
/// assert_eq!(lanes.into_inner(), 20);
/// # Ok::<(), tile_sort::TileError>(())
/// ```
pub fn launch<const N: usize, F>(config: &LaunchConfig, extent: usize, body: F) -> Result<()>
where
    F: Fn(&Tile<'_, N>) + Sync,
{
    check_tile_dim::<N>()?;
    let grid = extent.div_ceil(N);
    if grid == 0 {
        return Ok(());
    }
    tracing::debug!(backend = %config.backend, tile_dim = N, grid, extent, "launching tiles");

    let state = LaunchState::new(config);
    let run_tile = |index: usize| {
        if state.is_aborted() {
            return;
        }
        let tile = Tile::<N>::new(index, grid, extent, &state);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| body(&tile))) {
            state.fail(format!("tile {index}: {}", panic_message(payload.as_ref())));
        }
    };
    config.backend.dispatch(grid, &state, &run_tile)?;
    state.into_result()
}

/// Run `f` on a single stand-alone tile on the calling thread.
///
/// Useful to apply the tile-level primitives to one chunk without a grid.
///
/// ```
/// use tile_sort::{scan, with_tile};
///
/// let mut flags = [1u32, 0, 1, 1];
/// let total = with_tile::<4, _, _>(flags.len(), |tile| scan(tile, &mut flags));
/// assert_eq!(flags, [0, 1, 1, 2]);
/// assert_eq!(total, 3);
/// ```
pub fn with_tile<const N: usize, R, F>(extent: usize, f: F) -> R
where
    F: FnOnce(&Tile<'_, N>) -> R,
{
    let state = LaunchState::default();
    let tile = Tile::<N>::new(0, 1, extent, &state);
    f(&tile)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Backend;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_tile_geometry() {
        let state = LaunchState::default();
        let tile = Tile::<8>::new(2, 3, 20, &state);
        assert_eq!(Tile::<8>::DIM, 8);
        assert_eq!(tile.origin(), 16);
        assert_eq!(tile.global(3), 19);
        assert!(tile.contains(3));
        assert!(!tile.contains(4));
        assert_eq!(tile.active_lanes(), 4);
    }

    #[test]
    fn test_check_tile_dim() {
        assert!(check_tile_dim::<64>().is_ok());
        assert!(matches!(check_tile_dim::<0>(), Err(TileError::InvalidTileDim(0))));
        assert!(matches!(check_tile_dim::<48>(), Err(TileError::InvalidTileDim(48))));
    }

    #[test]
    fn test_launch_empty_extent() {
        let calls = AtomicUsize::new(0);
        launch::<8, _>(&LaunchConfig::default(), 0, |_| {
            calls.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
        assert_eq!(calls.into_inner(), 0);
    }

    #[test]
    fn test_launch_rejects_bad_dim() {
        let err = launch::<6, _>(&LaunchConfig::default(), 12, |_| {}).unwrap_err();
        assert!(matches!(err, TileError::InvalidTileDim(6)));
    }

    #[test]
    fn test_launch_reports_panic() {
        for backend in [Backend::Serial, Backend::Pooled(2), Backend::Resident] {
            let config = LaunchConfig::default().with_backend(backend);
            let err = launch::<4, _>(&config, 16, |tile| {
                if tile.index() == 2 {
                    panic!("boom");
                }
            })
            .unwrap_err();
            match err {
                TileError::KernelLaunchFailed(msg) => assert!(msg.contains("boom"), "{msg}"),
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn test_with_tile_leader_runs_once() {
        let mut runs = 0;
        with_tile::<16, _, _>(16, |tile| tile.leader(|| runs += 1));
        assert_eq!(runs, 1);
    }
}
