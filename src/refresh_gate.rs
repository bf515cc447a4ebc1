//! Image metadata refresh gate
//!
//! At most one refresh is outstanding. Requests that observe stale metadata,
//! or that arrive while a refresh runs, wait here and are resumed as a batch.

use crate::models::QueuedRequest;
use std::collections::VecDeque;

#[derive(Default)]
pub(crate) struct RefreshGate {
    in_progress: bool,
    parked: VecDeque<QueuedRequest>,
}

impl RefreshGate {
    pub(crate) fn in_progress(&self) -> bool {
        self.in_progress
    }

    /// Park a request behind the refresh
    ///
    /// Returns true if the caller must start the refresh.
    pub(crate) fn park(&mut self, request: QueuedRequest) -> bool {
        self.parked.push_back(request);
        if self.in_progress {
            return false;
        }
        self.in_progress = true;
        true
    }

    /// Conclude the refresh and hand back the parked batch
    ///
    /// Every request in the batch has its attempt count bumped.
    pub(crate) fn finish(&mut self) -> VecDeque<QueuedRequest> {
        self.in_progress = false;
        let mut batch = std::mem::take(&mut self.parked);
        for request in batch.iter_mut() {
            request.refresh_attempts += 1;
        }
        batch
    }

    pub(crate) fn parked_len(&self) -> usize {
        self.parked.len()
    }
}

/// Whether a request that has been through `attempts` refreshes may trigger another
pub(crate) fn may_retry_refresh(attempts: u32, max_refresh_retries: u32) -> bool {
    attempts <= max_refresh_retries
}
