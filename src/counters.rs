//! Lock-free request counters
//!
//! The counters are updated on the hot path without taking the gate lock.
//! Decisions that depend on them (`writes_blocked` drains, shutdown, lock
//! requests) read them while holding the gate lock; release on update and
//! acquire on load is the ordering those observations need.

use crate::models::Direction;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters tracking queued and in-flight requests
#[derive(Debug, Default)]
pub struct CounterSet {
    queued_reads: AtomicU64,
    queued_writes: AtomicU64,
    in_flight_writes: AtomicU64,
    in_flight_ios: AtomicU64,
    /// Requests past their counter decrements whose completion has not returned
    finalizing: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Accepted reads not yet dispatched (including parked ones)
    pub queued_reads: u64,
    /// Accepted writes, discards and flushes not yet dispatched
    pub queued_writes: u64,
    /// Write-direction requests handed to the executor and not yet finished
    pub in_flight_writes: u64,
    /// Every accepted request that has not been finalized
    pub in_flight_ios: u64,
}

impl CounterSet {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    fn queued(&self, direction: Direction) -> &AtomicU64 {
        if direction.includes_write() {
            &self.queued_writes
        } else {
            &self.queued_reads
        }
    }

    /// Account for a newly accepted request
    pub(crate) fn start_io(&self, direction: Direction) {
        self.in_flight_ios.fetch_add(1, Ordering::AcqRel);
        self.queued(direction).fetch_add(1, Ordering::AcqRel);
    }

    /// Move a request from queued to dispatched
    pub(crate) fn start_dispatch(&self, direction: Direction) {
        self.finish_queued(direction);
        if direction.includes_write() {
            self.in_flight_writes.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Drop a request that leaves the queue without being dispatched
    pub(crate) fn finish_queued(&self, direction: Direction) {
        let previous = self.queued(direction).fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "queued counter underflow");
    }

    /// Finish a dispatched write, returning the remaining in-flight writes
    pub(crate) fn finish_write(&self) -> u64 {
        let previous = self.in_flight_writes.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "in-flight write counter underflow");
        previous.saturating_sub(1)
    }

    /// Finish an accepted request, returning the remaining in-flight requests
    pub(crate) fn finish_io(&self) -> u64 {
        let previous = self.in_flight_ios.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "in-flight I/O counter underflow");
        previous.saturating_sub(1)
    }

    /// Enter the finalization window of a request
    pub(crate) fn start_finalize(&self) {
        self.finalizing.fetch_add(1, Ordering::AcqRel);
    }

    /// Leave the finalization window, returning the requests still inside it
    pub(crate) fn finish_finalize(&self) -> u64 {
        let previous = self.finalizing.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "finalizing counter underflow");
        previous.saturating_sub(1)
    }

    /// No accepted request is outstanding and no completion is still being delivered
    pub(crate) fn is_quiescent(&self) -> bool {
        self.in_flight_ios() == 0 && self.finalizing.load(Ordering::Acquire) == 0
    }

    pub fn queued_reads(&self) -> u64 {
        self.queued_reads.load(Ordering::Acquire)
    }

    pub fn queued_writes(&self) -> u64 {
        self.queued_writes.load(Ordering::Acquire)
    }

    pub fn in_flight_writes(&self) -> u64 {
        self.in_flight_writes.load(Ordering::Acquire)
    }

    pub fn in_flight_ios(&self) -> u64 {
        self.in_flight_ios.load(Ordering::Acquire)
    }

    /// Get a snapshot of all counters
    ///
    /// Fields are loaded one by one; use the snapshot for reporting, not for
    /// gating decisions.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            queued_reads: self.queued_reads(),
            queued_writes: self.queued_writes(),
            in_flight_writes: self.in_flight_writes(),
            in_flight_ios: self.in_flight_ios(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_read_lifecycle() {
        let counters = CounterSet::new();

        counters.start_io(Direction::Read);
        assert_eq!(counters.queued_reads(), 1);
        assert_eq!(counters.in_flight_ios(), 1);

        counters.start_dispatch(Direction::Read);
        assert_eq!(counters.queued_reads(), 0);
        assert_eq!(counters.in_flight_writes(), 0);

        assert_eq!(counters.finish_io(), 0);
    }

    #[test]
    fn test_flush_counts_as_write() {
        let counters = CounterSet::new();

        counters.start_io(Direction::Both);
        assert_eq!(counters.queued_writes(), 1);

        counters.start_dispatch(Direction::Both);
        assert_eq!(counters.in_flight_writes(), 1);
        assert_eq!(counters.finish_write(), 0);
    }

    #[test]
    fn test_in_flight_writes_never_exceed_ios() {
        let counters = CounterSet::new();

        for _ in 0..3 {
            counters.start_io(Direction::Write);
            counters.start_dispatch(Direction::Write);
            let snapshot = counters.snapshot();
            assert!(snapshot.in_flight_writes <= snapshot.in_flight_ios);
        }

        // reverse order on completion
        for remaining in (0..3).rev() {
            assert_eq!(counters.finish_write(), remaining);
            assert_eq!(counters.finish_io(), remaining);
        }
    }

    #[test]
    fn test_queued_request_dropped_before_dispatch() {
        let counters = CounterSet::new();

        counters.start_io(Direction::Write);
        counters.finish_queued(Direction::Write);
        assert_eq!(counters.finish_io(), 0);
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_quiescent_only_after_finalize() {
        let counters = CounterSet::new();
        assert!(counters.is_quiescent());

        counters.start_io(Direction::Read);
        counters.start_dispatch(Direction::Read);
        counters.start_finalize();
        assert_eq!(counters.finish_io(), 0);

        // counted out but its completion is still being delivered
        assert_eq!(counters.in_flight_ios(), 0);
        assert!(!counters.is_quiescent());

        assert_eq!(counters.finish_finalize(), 0);
        assert!(counters.is_quiescent());
    }

    #[test]
    fn test_thread_safety() {
        let counters = Arc::new(CounterSet::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let counters = Arc::clone(&counters);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    counters.start_io(Direction::Write);
                    counters.start_dispatch(Direction::Write);
                    counters.finish_write();
                    counters.finish_io();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }
}
