//! Instrumentation of block ownership during a partition.
//!
//! A [`Trace`] attached to a [`LaunchConfig`](crate::LaunchConfig) records,
//! in a single total order, when each tile finished reading the block it owns
//! and when tiles began writing into blocks. The order is consistent with the
//! happens-before order established by the block locks.

use parking_lot::Mutex;

/// One recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// `tile` finished copying its own block out of global memory.
    BlockRead {
        /// Reading tile (also the block's owner).
        tile: usize,
        /// Block that was read.
        block: usize,
    },
    /// `tile` is about to write elements into `block`.
    BlockWrite {
        /// Writing tile.
        tile: usize,
        /// Destination block.
        block: usize,
    },
    /// `tile` acquired the lock of `block`.
    LockAcquired {
        /// Acquiring tile.
        tile: usize,
        /// Locked block.
        block: usize,
    },
    /// `tile` released the lock of `block`.
    LockReleased {
        /// Releasing tile.
        tile: usize,
        /// Unlocked block.
        block: usize,
    },
}

/// A write that happened before the owner of the block had read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipViolation {
    /// The overwritten block.
    pub block: usize,
    /// The tile that wrote too early.
    pub writer: usize,
}

/// Ordered log of [`TraceEvent`]s.
#[derive(Debug, Default)]
pub struct Trace {
    events: Mutex<Vec<TraceEvent>>,
}

impl Trace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn record(&self, event: TraceEvent) {
        self.events.lock().push(event);
    }

    /// Snapshot of the events recorded so far, in order.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Every write into a block that precedes the block owner's read.
    ///
    /// A block whose owner never read it (there is no such block in a
    /// complete partition) counts every write as a violation.
    pub fn ownership_violations(&self) -> Vec<OwnershipViolation> {
        let events = self.events.lock();
        let mut read = std::collections::HashSet::new();
        let mut violations = Vec::new();
        for event in events.iter() {
            match *event {
                TraceEvent::BlockRead { block, .. } => {
                    read.insert(block);
                }
                TraceEvent::BlockWrite { tile, block } if !read.contains(&block) => {
                    violations.push(OwnershipViolation { block, writer: tile });
                }
                _ => {}
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_trace_has_no_violation() {
        let trace = Trace::new();
        trace.record(TraceEvent::BlockRead { tile: 0, block: 0 });
        trace.record(TraceEvent::BlockRead { tile: 1, block: 1 });
        trace.record(TraceEvent::BlockWrite { tile: 1, block: 0 });
        trace.record(TraceEvent::BlockWrite { tile: 0, block: 1 });
        assert_eq!(trace.len(), 4);
        assert!(trace.ownership_violations().is_empty());
    }

    #[test]
    fn test_early_write_is_reported() {
        let trace = Trace::new();
        trace.record(TraceEvent::BlockRead { tile: 0, block: 0 });
        trace.record(TraceEvent::BlockWrite { tile: 0, block: 1 });
        trace.record(TraceEvent::BlockRead { tile: 1, block: 1 });
        assert_eq!(
            trace.ownership_violations(),
            vec![OwnershipViolation { block: 1, writer: 0 }]
        );
    }
}
