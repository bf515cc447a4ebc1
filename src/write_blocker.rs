//! Write quiescence gate
//!
//! Blockers are reference counted. While the count is non-zero no write is
//! dispatched; writes that arrive are parked here in submission order and
//! resumed together once the last blocker is released.

use crate::models::{Callback, QueuedRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Default)]
pub(crate) struct WriteBlocker {
    blockers: u32,
    /// Blocker callbacks waiting for in-flight writes to drain; callbacks
    /// need not be `Sync`, so they sit behind their own mutex
    on_blocked: Mutex<Vec<Callback>>,
    parked: VecDeque<QueuedRequest>,
}

impl WriteBlocker {
    pub(crate) fn writes_blocked(&self) -> bool {
        self.blockers > 0
    }

    pub(crate) fn blockers(&self) -> u32 {
        self.blockers
    }

    /// Add a blocker
    ///
    /// # Returns
    /// * `Some(callback)` if no write is in flight and the caller may notify now
    /// * `None` if the callback was queued until in-flight writes drain
    pub(crate) fn block(&mut self, on_blocked: Callback, in_flight_writes: u64) -> Option<Callback> {
        self.blockers += 1;
        let waiters = self.on_blocked.get_mut();
        if !waiters.is_empty() || in_flight_writes > 0 {
            waiters.push(on_blocked);
            return None;
        }
        Some(on_blocked)
    }

    /// Release a blocker
    ///
    /// Returns the parked writes to resume when the count reaches zero.
    pub(crate) fn unblock(&mut self) -> VecDeque<QueuedRequest> {
        if self.blockers == 0 {
            warn!("unblock_writes called without a matching block_writes");
            return VecDeque::new();
        }

        self.blockers -= 1;
        if self.blockers > 0 {
            return VecDeque::new();
        }
        std::mem::take(&mut self.parked)
    }

    pub(crate) fn has_waiters(&self) -> bool {
        !self.on_blocked.lock().is_empty()
    }

    pub(crate) fn take_waiters(&mut self) -> Vec<Callback> {
        std::mem::take(self.on_blocked.get_mut())
    }

    pub(crate) fn park(&mut self, request: QueuedRequest) {
        self.parked.push_back(request);
    }

    pub(crate) fn parked_len(&self) -> usize {
        self.parked.len()
    }
}
