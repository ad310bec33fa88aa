//! Execution backends that schedule tiles onto host threads.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::error::{Result, TileError};
use crate::runtime::LaunchState;

/// Strategy used to run the tiles of a launch.
///
/// The backends differ in one property that matters for correctness:
/// whether every tile of a grid is guaranteed to keep making progress while
/// other tiles spin. Only [`Backend::Resident`] gives that guarantee, and only
/// for grids of at most
/// [`max_resident_tiles`](crate::LaunchConfig::max_resident_tiles) tiles,
/// which is what the in-place partition needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Run the tiles one after another on the calling thread.
    Serial,
    /// Run the tiles as tasks on a rayon pool with the given number of
    /// workers (`0` uses the global pool).
    Pooled(usize),
    /// Run the grid on up to `max_resident_tiles` OS threads that live for
    /// the whole launch. A grid that fits gets one thread per tile.
    #[default]
    Resident,
}

impl Backend {
    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Serial => "serial",
            Backend::Pooled(_) => "pooled",
            Backend::Resident => "resident",
        }
    }

    /// Whether every tile of a launch whose grid fits within
    /// `max_resident_tiles` is concurrently resident, so that a tile spinning
    /// on a lock cannot starve the tile that would release it.
    pub fn guarantees_forward_progress(&self) -> bool {
        matches!(self, Backend::Resident)
    }

    /// Run `body` once per tile index in `0..grid`.
    ///
    /// Failures inside `body` are recorded on `state` by the caller's wrapper;
    /// this only reports failures to schedule the tiles at all.
    pub(crate) fn dispatch(
        &self,
        grid: usize,
        state: &LaunchState,
        body: &(dyn Fn(usize) + Sync),
    ) -> Result<()> {
        match *self {
            Backend::Serial => {
                (0..grid).for_each(body);
            }
            Backend::Pooled(0) => {
                (0..grid).into_par_iter().for_each(body);
            }
            Backend::Pooled(threads) => {
                let pool = state.pools().get(threads)?;
                pool.install(|| (0..grid).into_par_iter().for_each(body));
            }
            Backend::Resident => run_resident(grid, state, body),
        }
        Ok(())
    }
}

/// Start `min(grid, max_resident_tiles)` workers that claim tile indices in
/// ascending order until the grid is exhausted.
///
/// With as many workers as tiles, a tile that is not claimed yet always has
/// an idle worker to pick it up, so no tile waits on one that never starts.
fn run_resident(grid: usize, state: &LaunchState, body: &(dyn Fn(usize) + Sync)) {
    let workers = grid.min(state.max_resident_tiles().max(1));
    let next = AtomicUsize::new(0);
    thread::scope(|s| {
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let next = &next;
            let spawned = thread::Builder::new()
                .name(format!("tile-worker-{worker}"))
                .spawn_scoped(s, move || loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    if index >= grid {
                        break;
                    }
                    body(index);
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Tiles already running may be spinning on blocks owned by
                    // tiles that now have no worker to run them.
                    state.fail(format!("could not start tile worker {worker}: {e}"));
                    break;
                }
            }
        }
        for handle in handles {
            if handle.join().is_err() {
                state.fail("tile thread panicked outside the kernel body".to_string());
            }
        }
    });
}

#[derive(Debug, Default)]
struct PoolSlot {
    pool: Mutex<Option<Arc<rayon::ThreadPool>>>,
    builds: AtomicUsize,
}

/// Dedicated rayon pool for [`Backend::Pooled`], built on first use and shared
/// by every clone of the owning [`LaunchConfig`](crate::LaunchConfig).
#[derive(Debug, Clone, Default)]
pub(crate) struct PoolCache(Arc<PoolSlot>);

impl PoolCache {
    /// Pool with `threads` workers, rebuilt only when the count changes.
    pub(crate) fn get(&self, threads: usize) -> Result<Arc<rayon::ThreadPool>> {
        let mut slot = self.0.pool.lock();
        if let Some(pool) = slot.as_ref().filter(|pool| pool.current_num_threads() == threads) {
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|i| format!("tile-pool-{i}"))
                .build()?,
        );
        self.0.builds.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(threads, "built tile worker pool");
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    #[cfg(test)]
    pub(crate) fn builds(&self) -> usize {
        self.0.builds.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Pooled(threads) => write!(f, "pooled:{threads}"),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for Backend {
    type Err = TileError;

    /// Parse `serial`, `resident`, `pooled` or `pooled:<threads>`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.split_once(':') {
            None if s == "serial" => Ok(Backend::Serial),
            None if s == "resident" => Ok(Backend::Resident),
            None if s == "pooled" => Ok(Backend::Pooled(0)),
            Some(("pooled", threads)) => threads
                .parse()
                .map(Backend::Pooled)
                .map_err(|e| TileError::InvalidConfig(format!("pooled thread count `{threads}`: {e}"))),
            _ => Err(TileError::InvalidConfig(format!("unknown backend `{s}`"))),
        }
    }
}
