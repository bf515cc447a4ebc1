//! Completion handles shared between callers and the queue
//!
//! An [`AioCompletion`] is cloned freely: the caller keeps one clone to wait on
//! and the queue carries another through every gate. Whichever path finishes
//! the request first finalizes it; the handle delivers exactly one result.

use crate::error::Result;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

/// Callback invoked with the result when the request finishes
pub type CompletionCallback = Box<dyn FnOnce(&Result<usize>) + Send + 'static>;

/// Reference-counted, finalize-once completion handle
#[derive(Clone)]
pub struct AioCompletion {
    inner: Arc<CompletionInner>,
}

struct CompletionInner {
    finalized: AtomicBool,
    state: Mutex<CompletionState>,
    cond: Condvar,
    notify: Notify,
    callback: Mutex<Option<CompletionCallback>>,
}

#[derive(Default)]
struct CompletionState {
    result: Option<Result<usize>>,
    read_data: Option<Bytes>,
}

impl AioCompletion {
    /// Create a completion that is only observed by waiting
    pub fn new() -> Self {
        AioCompletion {
            inner: Arc::new(CompletionInner {
                finalized: AtomicBool::new(false),
                state: Mutex::new(CompletionState::default()),
                cond: Condvar::new(),
                notify: Notify::new(),
                callback: Mutex::new(None),
            }),
        }
    }

    /// Create a completion that invokes `callback` when finalized
    ///
    /// The callback runs on whichever thread finalizes the request, before
    /// waiters are woken.
    pub fn with_callback<F>(callback: F) -> Self
    where
        F: FnOnce(&Result<usize>) + Send + 'static,
    {
        let completion = Self::new();
        *completion.inner.callback.lock() = Some(Box::new(callback));
        completion
    }

    /// Check whether a result has been delivered
    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().result.is_some()
    }

    /// Get the delivered result, if any
    pub fn result(&self) -> Option<Result<usize>> {
        self.inner.state.lock().result.clone()
    }

    /// Take the payload returned by a completed read
    pub fn take_read_data(&self) -> Option<Bytes> {
        self.inner.state.lock().read_data.take()
    }

    /// Block the calling thread until the request is finalized
    pub fn wait(&self) -> Result<usize> {
        let mut state = self.inner.state.lock();
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            self.inner.cond.wait(&mut state);
        }
    }

    /// Wait asynchronously until the request is finalized
    pub async fn wait_async(&self) -> Result<usize> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent finalize cannot be missed
            notified.as_mut().enable();

            if let Some(result) = self.result() {
                return result;
            }
            notified.await;
        }
    }

    pub(crate) fn set_read_data(&self, data: Bytes) {
        self.inner.state.lock().read_data = Some(data);
    }

    /// Deliver the result
    ///
    /// # Returns
    /// * `true` if this call finalized the handle
    /// * `false` if the handle had already been finalized
    pub(crate) fn complete(&self, result: Result<usize>) -> bool {
        if self
            .inner
            .finalized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Completion finalized twice, dropping result {:?}", result);
            return false;
        }

        self.inner.state.lock().result = Some(result.clone());

        let callback = self.inner.callback.lock().take();
        if let Some(callback) = callback {
            callback(&result);
        }

        self.inner.cond.notify_all();
        self.inner.notify.notify_waiters();
        true
    }
}

impl Default for AioCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AioCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AioCompletion")
            .field("finalized", &self.inner.finalized.load(Ordering::Acquire))
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}
