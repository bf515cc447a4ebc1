//! In-memory image
//!
//! A byte vector standing in for the storage cluster, together with simulated
//! exclusive lock and metadata refresh services. Each collaborator can be
//! paused with a gate and given an injected result, which makes every queue
//! gate observable.

use crate::error::{neg_errno, BackendResult};
use crate::image::{ExclusiveLock, ImageBackend, ImageContext, ImageRefresh};
use async_trait::async_trait;
use bytes::Bytes;
use nix::errno::Errno;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Open/closed switch that async operations wait on
struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    fn new() -> Self {
        let (open, _) = watch::channel(true);
        Gate { open }
    }

    fn set(&self, open: bool) {
        self.open.send_replace(open);
    }

    async fn pass(&self) {
        let mut rx = self.open.subscribe();
        if rx.wait_for(|open| *open).await.is_err() {
            debug!("Gate sender dropped while waiting");
        }
    }
}

/// In-memory implementation of every image collaborator
pub struct MemoryImage {
    data: RwLock<Vec<u8>>,
    write_gate: Gate,
    writes_in_progress: AtomicUsize,
    flushes: AtomicUsize,
    backend_error: Mutex<Option<i32>>,

    lock_owner: AtomicBool,
    lock_gate: Gate,
    lock_result: Mutex<BackendResult<()>>,
    lock_requests: AtomicUsize,

    stale: AtomicBool,
    sticky_stale: AtomicBool,
    refresh_gate: Gate,
    refresh_result: Mutex<BackendResult<()>>,
    refreshes: AtomicUsize,
}

impl MemoryImage {
    /// Create a zero-filled image of `size` bytes
    ///
    /// The image starts with the exclusive lock held and fresh metadata.
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(MemoryImage {
            data: RwLock::new(vec![0u8; size]),
            write_gate: Gate::new(),
            writes_in_progress: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            backend_error: Mutex::new(None),
            lock_owner: AtomicBool::new(true),
            lock_gate: Gate::new(),
            lock_result: Mutex::new(Ok(())),
            lock_requests: AtomicUsize::new(0),
            stale: AtomicBool::new(false),
            sticky_stale: AtomicBool::new(false),
            refresh_gate: Gate::new(),
            refresh_result: Mutex::new(Ok(())),
            refreshes: AtomicUsize::new(0),
        })
    }

    /// Build an image context whose collaborators are all this image
    pub fn context(self: &Arc<Self>, name: &str) -> Arc<ImageContext> {
        let size = self.data.read().len() as u64;
        Arc::new(ImageContext::new(
            name,
            size,
            self.clone(),
            self.clone(),
            self.clone(),
        ))
    }

    // Backend controls

    /// Pause (false) or resume (true) writes and discards
    pub fn set_writes_open(&self, open: bool) {
        self.write_gate.set(open);
    }

    /// Writes and discards currently executing
    pub fn writes_in_progress(&self) -> usize {
        self.writes_in_progress.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Fail every following backend operation with `code` (None to clear)
    pub fn set_backend_error(&self, code: Option<i32>) {
        *self.backend_error.lock() = code;
    }

    /// Copy of the current contents of `offset..offset + len`, or `None` if
    /// the extent runs past the end of the image
    pub fn contents(&self, offset: usize, len: usize) -> Option<Vec<u8>> {
        let end = offset.checked_add(len)?;
        self.data.read().get(offset..end).map(<[u8]>::to_vec)
    }

    // Lock controls

    pub fn set_lock_owner(&self, owner: bool) {
        self.lock_owner.store(owner, Ordering::SeqCst);
    }

    /// Hold (false) or release (true) pending lock acquisitions
    pub fn set_lock_requests_open(&self, open: bool) {
        self.lock_gate.set(open);
    }

    pub fn set_lock_result(&self, result: BackendResult<()>) {
        *self.lock_result.lock() = result;
    }

    pub fn lock_request_count(&self) -> usize {
        self.lock_requests.load(Ordering::SeqCst)
    }

    // Refresh controls

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Keep metadata stale even after a successful refresh
    pub fn set_sticky_stale(&self, sticky: bool) {
        self.sticky_stale.store(sticky, Ordering::SeqCst);
    }

    /// Hold (false) or release (true) pending refreshes
    pub fn set_refreshes_open(&self, open: bool) {
        self.refresh_gate.set(open);
    }

    pub fn set_refresh_result(&self, result: BackendResult<()>) {
        *self.refresh_result.lock() = result;
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn check_extent(&self, offset: u64, len: u64) -> BackendResult<(usize, usize)> {
        if let Some(code) = *self.backend_error.lock() {
            return Err(code);
        }

        let size = self.data.read().len() as u64;
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok((offset as usize, end as usize)),
            _ => Err(neg_errno(Errno::EINVAL)),
        }
    }
}

#[async_trait]
impl ImageBackend for MemoryImage {
    async fn read(&self, offset: u64, len: u64, _op_flags: u32) -> BackendResult<Bytes> {
        let (start, end) = self.check_extent(offset, len)?;
        Ok(Bytes::copy_from_slice(&self.data.read()[start..end]))
    }

    async fn write(&self, offset: u64, data: Bytes, _op_flags: u32) -> BackendResult<usize> {
        self.writes_in_progress.fetch_add(1, Ordering::SeqCst);
        self.write_gate.pass().await;

        let result = self.check_extent(offset, data.len() as u64).map(|(start, end)| {
            self.data.write()[start..end].copy_from_slice(&data);
            data.len()
        });

        self.writes_in_progress.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn discard(&self, offset: u64, len: u64) -> BackendResult<usize> {
        self.writes_in_progress.fetch_add(1, Ordering::SeqCst);
        self.write_gate.pass().await;

        let result = self.check_extent(offset, len).map(|(start, end)| {
            self.data.write()[start..end].fill(0);
            end - start
        });

        self.writes_in_progress.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn flush(&self) -> BackendResult<()> {
        if let Some(code) = *self.backend_error.lock() {
            return Err(code);
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ExclusiveLock for MemoryImage {
    fn is_lock_owner(&self) -> bool {
        self.lock_owner.load(Ordering::SeqCst)
    }

    async fn acquire(&self) -> BackendResult<()> {
        self.lock_requests.fetch_add(1, Ordering::SeqCst);
        self.lock_gate.pass().await;

        let result = *self.lock_result.lock();
        if result.is_ok() {
            self.lock_owner.store(true, Ordering::SeqCst);
        }
        result
    }
}

#[async_trait]
impl ImageRefresh for MemoryImage {
    fn is_refresh_required(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    async fn refresh(&self) -> BackendResult<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        self.refresh_gate.pass().await;

        let result = *self.refresh_result.lock();
        if result.is_ok() && !self.sticky_stale.load(Ordering::SeqCst) {
            self.stale.store(false, Ordering::SeqCst);
        }
        result
    }
}
