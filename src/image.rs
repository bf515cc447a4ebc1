//! Image context and the collaborators the queue drives
//!
//! The queue never talks to the storage cluster, the lock protocol or the
//! metadata store directly. It goes through the three traits below, bundled in
//! an [`ImageContext`] shared with the rest of the client.

use crate::error::BackendResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Storage backend executing dispatched requests
///
/// Failures are reported as negative errno values and handed to the caller
/// unmodified.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn read(&self, offset: u64, len: u64, op_flags: u32) -> BackendResult<Bytes>;

    /// Returns the number of bytes written
    async fn write(&self, offset: u64, data: Bytes, op_flags: u32) -> BackendResult<usize>;

    /// Returns the number of bytes discarded
    async fn discard(&self, offset: u64, len: u64) -> BackendResult<usize>;

    async fn flush(&self) -> BackendResult<()>;
}

/// Exclusive lock protocol
#[async_trait]
pub trait ExclusiveLock: Send + Sync {
    /// Whether this client currently holds the lock
    ///
    /// Called inside the queue's gate critical section; must not block.
    fn is_lock_owner(&self) -> bool;

    /// Acquire the lock, resolving once granted or denied
    async fn acquire(&self) -> BackendResult<()>;
}

/// Image metadata refresh
#[async_trait]
pub trait ImageRefresh: Send + Sync {
    /// Whether cached metadata is known to be stale
    ///
    /// Called inside the queue's gate critical section; must not block.
    fn is_refresh_required(&self) -> bool;

    async fn refresh(&self) -> BackendResult<()>;
}

/// Shared, long-lived description of an open image
pub struct ImageContext {
    name: String,
    size: AtomicU64,
    backend: Arc<dyn ImageBackend>,
    exclusive_lock: Arc<dyn ExclusiveLock>,
    state: Arc<dyn ImageRefresh>,
}

impl ImageContext {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        backend: Arc<dyn ImageBackend>,
        exclusive_lock: Arc<dyn ExclusiveLock>,
        state: Arc<dyn ImageRefresh>,
    ) -> Self {
        ImageContext {
            name: name.into(),
            size: AtomicU64::new(size),
            backend,
            exclusive_lock,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current image size in bytes
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Update the size, e.g. after a refresh observed a resize
    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    pub fn backend(&self) -> &Arc<dyn ImageBackend> {
        &self.backend
    }

    pub fn exclusive_lock(&self) -> &Arc<dyn ExclusiveLock> {
        &self.exclusive_lock
    }

    pub fn state(&self) -> &Arc<dyn ImageRefresh> {
        &self.state
    }
}

impl fmt::Debug for ImageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageContext")
            .field("name", &self.name)
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}
