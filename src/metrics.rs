//! Metrics collection for the image request queue
//!
//! This module provides thread-safe metrics collection using atomic operations.
//! It tracks submissions, dispatches, gate parking and gate collaborator calls.

use crate::models::ImageRequest;
use std::sync::atomic::{AtomicU64, Ordering};

/// Gate a request was parked on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkReason {
    Lock,
    WriteBlocker,
    Refresh,
    FlushBarrier,
}

/// Metrics collector for the image request queue
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    // Submission statistics
    reads_submitted: AtomicU64,
    writes_submitted: AtomicU64,
    discards_submitted: AtomicU64,
    flushes_submitted: AtomicU64,

    // Lifecycle statistics
    requests_dispatched: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    shutdown_rejections: AtomicU64,

    // Gate statistics
    parked_on_lock: AtomicU64,
    parked_on_write_blocker: AtomicU64,
    parked_on_refresh: AtomicU64,
    parked_on_flush_barrier: AtomicU64,
    lock_requests: AtomicU64,
    refreshes: AtomicU64,

    // Byte statistics
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub reads_submitted: u64,
    pub writes_submitted: u64,
    pub discards_submitted: u64,
    pub flushes_submitted: u64,

    pub requests_dispatched: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub shutdown_rejections: u64,

    pub parked_on_lock: u64,
    pub parked_on_write_blocker: u64,
    pub parked_on_refresh: u64,
    pub parked_on_flush_barrier: u64,
    pub lock_requests: u64,
    pub refreshes: u64,

    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl QueueMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submission
    pub fn record_submission(&self, request: &ImageRequest) {
        let counter = match request {
            ImageRequest::Read { .. } => &self.reads_submitted,
            ImageRequest::Write { .. } => &self.writes_submitted,
            ImageRequest::Discard { .. } => &self.discards_submitted,
            ImageRequest::Flush => &self.flushes_submitted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request handed to the executor
    pub fn record_dispatch(&self) {
        self.requests_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the finalization of an accepted request
    ///
    /// # Arguments
    /// * `success` - Whether the request completed without error
    pub fn record_completion(&self, success: bool) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a submission rejected because the queue is shutting down
    pub fn record_shutdown_rejection(&self) {
        self.shutdown_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request parked on a gate
    pub fn record_parked(&self, reason: ParkReason) {
        let counter = match reason {
            ParkReason::Lock => &self.parked_on_lock,
            ParkReason::WriteBlocker => &self.parked_on_write_blocker,
            ParkReason::Refresh => &self.parked_on_refresh,
            ParkReason::FlushBarrier => &self.parked_on_flush_barrier,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an exclusive lock acquisition attempt
    pub fn record_lock_request(&self) {
        self.lock_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an image refresh
    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_read(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_written(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Returns a point-in-time snapshot of all metrics. Note that due to the
    /// concurrent nature of the system, the snapshot may not be perfectly
    /// consistent across all fields.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            reads_submitted: self.reads_submitted.load(Ordering::Relaxed),
            writes_submitted: self.writes_submitted.load(Ordering::Relaxed),
            discards_submitted: self.discards_submitted.load(Ordering::Relaxed),
            flushes_submitted: self.flushes_submitted.load(Ordering::Relaxed),
            requests_dispatched: self.requests_dispatched.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            shutdown_rejections: self.shutdown_rejections.load(Ordering::Relaxed),
            parked_on_lock: self.parked_on_lock.load(Ordering::Relaxed),
            parked_on_write_blocker: self.parked_on_write_blocker.load(Ordering::Relaxed),
            parked_on_refresh: self.parked_on_refresh.load(Ordering::Relaxed),
            parked_on_flush_barrier: self.parked_on_flush_barrier.load(Ordering::Relaxed),
            lock_requests: self.lock_requests.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics to zero
    ///
    /// This is primarily useful for testing.
    pub fn reset(&self) {
        self.reads_submitted.store(0, Ordering::Relaxed);
        self.writes_submitted.store(0, Ordering::Relaxed);
        self.discards_submitted.store(0, Ordering::Relaxed);
        self.flushes_submitted.store(0, Ordering::Relaxed);
        self.requests_dispatched.store(0, Ordering::Relaxed);
        self.requests_completed.store(0, Ordering::Relaxed);
        self.requests_failed.store(0, Ordering::Relaxed);
        self.shutdown_rejections.store(0, Ordering::Relaxed);
        self.parked_on_lock.store(0, Ordering::Relaxed);
        self.parked_on_write_blocker.store(0, Ordering::Relaxed);
        self.parked_on_refresh.store(0, Ordering::Relaxed);
        self.parked_on_flush_barrier.store(0, Ordering::Relaxed);
        self.lock_requests.store(0, Ordering::Relaxed);
        self.refreshes.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }
}

impl MetricsSnapshot {
    /// Total submissions across all request kinds
    pub fn total_submitted(&self) -> u64 {
        self.reads_submitted + self.writes_submitted + self.discards_submitted + self.flushes_submitted
    }

    /// Total times a request was parked on any gate
    pub fn total_parked(&self) -> u64 {
        self.parked_on_lock
            + self.parked_on_write_blocker
            + self.parked_on_refresh
            + self.parked_on_flush_barrier
    }

    /// Calculate the failure rate of accepted requests as a percentage (0.0 to 100.0)
    pub fn failure_rate(&self) -> f64 {
        if self.requests_completed == 0 {
            0.0
        } else {
            (self.requests_failed as f64 / self.requests_completed as f64) * 100.0
        }
    }
}
