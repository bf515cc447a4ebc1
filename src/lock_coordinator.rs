//! Exclusive lock gating
//!
//! Tracks which directions require the exclusive lock and parks requests while
//! an acquisition is outstanding. Only the first request to find the lock
//! missing triggers an acquisition; later ones join the same wait list.

use crate::models::{Direction, QueuedRequest};
use std::collections::VecDeque;

#[derive(Default)]
pub(crate) struct LockCoordinator {
    require_on_read: bool,
    require_on_write: bool,
    acquiring: bool,
    parked: VecDeque<QueuedRequest>,
}

impl LockCoordinator {
    pub(crate) fn new(require_on_read: bool, require_on_write: bool) -> Self {
        LockCoordinator {
            require_on_read,
            require_on_write,
            ..Default::default()
        }
    }

    /// Update the requirement for a direction
    ///
    /// Returns true if any flag changed.
    pub(crate) fn set_require_lock(&mut self, direction: Direction, enabled: bool) -> bool {
        let mut changed = false;
        if direction.includes_read() {
            changed |= self.require_on_read != enabled;
            self.require_on_read = enabled;
        }
        if direction.includes_write() {
            changed |= self.require_on_write != enabled;
            self.require_on_write = enabled;
        }
        changed
    }

    /// Whether dispatching `direction` requires holding the lock
    pub(crate) fn requires_lock(&self, direction: Direction) -> bool {
        (direction.includes_read() && self.require_on_read)
            || (direction.includes_write() && self.require_on_write)
    }

    /// Whether some direction requires the lock and it is not held
    pub(crate) fn is_lock_required(&self, lock_owner: bool) -> bool {
        (self.require_on_read || self.require_on_write) && !lock_owner
    }

    /// Whether queued work needs the lock and no acquisition is outstanding
    pub(crate) fn is_lock_request_needed(&self, queued_reads: u64, queued_writes: u64) -> bool {
        !self.acquiring
            && ((self.require_on_write && queued_writes > 0)
                || (self.require_on_read && queued_reads > 0))
    }

    pub(crate) fn acquiring(&self) -> bool {
        self.acquiring
    }

    /// Park a request behind the lock
    ///
    /// Returns true if the caller must trigger the acquisition.
    pub(crate) fn park(&mut self, request: QueuedRequest) -> bool {
        self.parked.push_back(request);
        if self.acquiring {
            return false;
        }
        self.acquiring = true;
        true
    }

    /// Conclude the outstanding acquisition and hand back every parked request
    pub(crate) fn finish_acquire(&mut self) -> VecDeque<QueuedRequest> {
        self.acquiring = false;
        std::mem::take(&mut self.parked)
    }

    /// Hand back parked requests for re-evaluation without ending the acquisition
    pub(crate) fn take_parked(&mut self) -> VecDeque<QueuedRequest> {
        std::mem::take(&mut self.parked)
    }

    pub(crate) fn parked_len(&self) -> usize {
        self.parked.len()
    }
}
