//! Image request queue
//!
//! Every submitted request passes the same gates in order before it reaches
//! the executor:
//!
//! 1. shutdown: rejected outright once `shut_down` was called
//! 2. exclusive lock: parked while an acquisition it needs is outstanding
//! 3. write blocker: writes parked while blockers are held
//! 4. refresh: parked while metadata is stale or a refresh runs
//! 5. flush barrier: a flush waits for every earlier write to finalize
//!
//! A parked request is held by its gate and re-evaluated from the lock gate
//! when that gate clears. All gate state sits behind one reader/writer lock
//! held only for short, non-blocking sections; the request counters are
//! atomics updated alongside it.

use crate::completion::AioCompletion;
use crate::config::QueueConfig;
use crate::counters::{CounterSet, CounterSnapshot};
use crate::error::{neg_errno, AioError, BackendResult, Result};
use crate::executor::TaskExecutor;
use crate::image::ImageContext;
use crate::lock_coordinator::LockCoordinator;
use crate::metrics::{ParkReason, QueueMetrics};
use crate::models::{Callback, Direction, ImageRequest, QueuedRequest};
use crate::refresh_gate::{may_retry_refresh, RefreshGate};
use crate::write_blocker::WriteBlocker;
use bytes::Bytes;
use nix::errno::Errno;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

/// Asynchronous I/O dispatch queue for one image
#[derive(Clone)]
pub struct ImageRequestQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    image: Arc<ImageContext>,
    executor: Arc<dyn TaskExecutor>,
    config: QueueConfig,
    counters: CounterSet,
    state: RwLock<GateState>,
    idle: Notify,
    metrics: QueueMetrics,
}

struct GateState {
    blocker: WriteBlocker,
    lock: LockCoordinator,
    refresh: RefreshGate,
    barrier: WriteBarrier,
    shutdown: bool,
    on_shutdown: Mutex<Option<Callback>>,
}

impl GateState {
    fn parked_len(&self) -> usize {
        self.lock.parked_len()
            + self.blocker.parked_len()
            + self.refresh.parked_len()
            + self.barrier.parked.len()
    }
}

/// Orders flushes behind the writes submitted before them
#[derive(Default)]
struct WriteBarrier {
    last_seq: u64,
    /// Sequences of accepted writes that have not been finalized
    pending: BTreeSet<u64>,
    parked: VecDeque<QueuedRequest>,
}

impl WriteBarrier {
    fn register_write(&mut self) -> u64 {
        self.last_seq += 1;
        self.pending.insert(self.last_seq);
        self.last_seq
    }

    fn last_seq(&self) -> u64 {
        self.last_seq
    }

    fn blocks(&self, barrier: u64) -> bool {
        self.pending.first().is_some_and(|&oldest| oldest <= barrier)
    }

    /// Finalize a write and return the flushes it was holding back
    fn release(&mut self, seq: u64) -> Vec<QueuedRequest> {
        self.pending.remove(&seq);

        let mut ready = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.parked.len());
        for flush in self.parked.drain(..) {
            match flush.flush_barrier {
                Some(barrier) if self.pending.first().is_some_and(|&oldest| oldest <= barrier) => {
                    waiting.push_back(flush)
                }
                _ => ready.push(flush),
            }
        }
        self.parked = waiting;
        ready
    }
}

/// Outcome of running a request through the gates
enum Gate {
    Dispatch(QueuedRequest),
    Parked(Option<Trigger>),
    Failed(QueuedRequest, AioError),
}

/// Collaborator call a parked request must start
enum Trigger {
    AcquireLock,
    Refresh,
}

impl ImageRequestQueue {
    /// Create a queue for `image`, executing requests on `executor`
    pub fn new(
        image: Arc<ImageContext>,
        executor: Arc<dyn TaskExecutor>,
        config: QueueConfig,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            "Creating image request queue: name={}, image={}, require_lock_on_read={}, require_lock_on_write={}",
            config.name,
            image.name(),
            config.require_lock_on_read,
            config.require_lock_on_write
        );

        let state = GateState {
            blocker: WriteBlocker::default(),
            lock: LockCoordinator::new(config.require_lock_on_read, config.require_lock_on_write),
            refresh: RefreshGate::default(),
            barrier: WriteBarrier::default(),
            shutdown: false,
            on_shutdown: Mutex::new(None),
        };

        Ok(ImageRequestQueue {
            inner: Arc::new(QueueInner {
                image,
                executor,
                config,
                counters: CounterSet::new(),
                state: RwLock::new(state),
                idle: Notify::new(),
                metrics: QueueMetrics::new(),
            }),
        })
    }

    pub fn image(&self) -> &Arc<ImageContext> {
        &self.inner.image
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.inner.metrics
    }

    /// Snapshot of the queued and in-flight counters
    pub fn counters(&self) -> CounterSnapshot {
        self.inner.counters.snapshot()
    }

    /// Number of accepted requests currently held by a gate
    pub fn parked_requests(&self) -> usize {
        self.inner.state.read().parked_len()
    }

    // Synchronous API: these block the calling thread and must not be called
    // from one of the executor's own tasks.

    /// Read `buf.len()` bytes at `offset`, returning the number of bytes read
    pub fn read(&self, offset: u64, buf: &mut [u8], op_flags: u32) -> Result<usize> {
        let completion = AioCompletion::new();
        self.submit_read(completion.clone(), offset, buf.len() as u64, op_flags);

        let bytes = completion.wait()?;
        if let Some(data) = completion.take_read_data() {
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
        }
        Ok(bytes)
    }

    /// Write `data` at `offset`, returning the number of bytes written
    pub fn write(&self, offset: u64, data: &[u8], op_flags: u32) -> Result<usize> {
        let completion = AioCompletion::new();
        self.submit_write(
            completion.clone(),
            offset,
            Bytes::copy_from_slice(data),
            op_flags,
        );
        completion.wait()
    }

    /// Discard `len` bytes at `offset`, returning the number of bytes discarded
    pub fn discard(&self, offset: u64, len: u64) -> Result<usize> {
        let completion = AioCompletion::new();
        self.submit_discard(completion.clone(), offset, len);
        completion.wait()
    }

    /// Flush every write submitted before this call
    pub fn flush(&self) -> Result<()> {
        let completion = AioCompletion::new();
        self.submit_flush(completion.clone());
        completion.wait().map(|_| ())
    }

    // Asynchronous API: the result is delivered through `completion`.

    pub fn submit_read(&self, completion: AioCompletion, offset: u64, len: u64, op_flags: u32) {
        self.submit(
            ImageRequest::Read {
                offset,
                len,
                op_flags,
            },
            completion,
        );
    }

    pub fn submit_write(&self, completion: AioCompletion, offset: u64, data: Bytes, op_flags: u32) {
        self.submit(
            ImageRequest::Write {
                offset,
                data,
                op_flags,
            },
            completion,
        );
    }

    pub fn submit_discard(&self, completion: AioCompletion, offset: u64, len: u64) {
        self.submit(ImageRequest::Discard { offset, len }, completion);
    }

    pub fn submit_flush(&self, completion: AioCompletion) {
        self.submit(ImageRequest::Flush, completion);
    }

    /// Submit a request; its result is delivered through `completion` exactly once
    pub fn submit(&self, request: ImageRequest, completion: AioCompletion) {
        self.inner.metrics.record_submission(&request);

        let request = match request.clip_to(self.inner.image.size()) {
            Ok(request) => request,
            Err(err) => {
                debug!("Rejecting request: {}", err);
                completion.complete(Err(err));
                return;
            }
        };

        let mut queued = QueuedRequest::new(request, completion);
        if !self.start_in_flight_io(&mut queued) {
            return;
        }
        self.dispatch(queued);
    }

    /// Accept a request unless the queue is shutting down
    fn start_in_flight_io(&self, queued: &mut QueuedRequest) -> bool {
        let direction = queued.direction();

        let accepted = if direction.includes_write() {
            let mut state = self.inner.state.write();
            if !state.shutdown {
                if queued.request.modifies_data() {
                    queued.write_seq = Some(state.barrier.register_write());
                } else {
                    queued.flush_barrier = Some(state.barrier.last_seq());
                }
                self.inner.counters.start_io(direction);
            }
            !state.shutdown
        } else {
            let state = self.inner.state.read();
            if !state.shutdown {
                self.inner.counters.start_io(direction);
            }
            !state.shutdown
        };

        if !accepted {
            error!(
                "I/O received on closed image {}: {}",
                self.inner.image.name(),
                queued.request.kind()
            );
            self.inner.metrics.record_shutdown_rejection();
            queued.completion.complete(Err(AioError::ShuttingDown));
        }
        accepted
    }

    /// Run a request through the gates and act on the outcome
    fn dispatch(&self, queued: QueuedRequest) {
        let gate = {
            let mut state = self.inner.state.write();
            self.evaluate(&mut state, queued)
        };

        match gate {
            Gate::Dispatch(queued) => self.execute(queued),
            Gate::Parked(Some(Trigger::AcquireLock)) => self.request_lock(),
            Gate::Parked(Some(Trigger::Refresh)) => self.refresh(),
            Gate::Parked(None) => {}
            Gate::Failed(queued, err) => self.fail_queued_io(queued, err),
        }
    }

    fn evaluate(&self, state: &mut GateState, queued: QueuedRequest) -> Gate {
        let inner = &self.inner;
        let direction = queued.direction();

        if state.lock.requires_lock(direction) && !inner.image.exclusive_lock().is_lock_owner() {
            if !inner.config.auto_request_lock {
                warn!(
                    "{} requires the exclusive lock but automatic lock requests are disabled",
                    queued.request.kind()
                );
                return Gate::Failed(queued, AioError::LockRequired);
            }

            inner.metrics.record_parked(ParkReason::Lock);
            let trigger = if state.lock.park(queued) {
                Some(Trigger::AcquireLock)
            } else {
                None
            };
            return Gate::Parked(trigger);
        }

        if direction.includes_write() && state.blocker.writes_blocked() {
            inner.metrics.record_parked(ParkReason::WriteBlocker);
            state.blocker.park(queued);
            return Gate::Parked(None);
        }

        if state.refresh.in_progress() || inner.image.state().is_refresh_required() {
            if !state.refresh.in_progress()
                && !may_retry_refresh(queued.refresh_attempts, inner.config.max_refresh_retries)
            {
                warn!(
                    "Image metadata still stale after {} refreshes, failing {}",
                    queued.refresh_attempts,
                    queued.request.kind()
                );
                return Gate::Failed(queued, AioError::RefreshFailed(neg_errno(Errno::ESTALE)));
            }

            inner.metrics.record_parked(ParkReason::Refresh);
            let trigger = if state.refresh.park(queued) {
                Some(Trigger::Refresh)
            } else {
                None
            };
            return Gate::Parked(trigger);
        }

        if let Some(barrier) = queued.flush_barrier {
            if state.barrier.blocks(barrier) {
                inner.metrics.record_parked(ParkReason::FlushBarrier);
                state.barrier.parked.push_back(queued);
                return Gate::Parked(None);
            }
        }

        inner.counters.start_dispatch(direction);
        Gate::Dispatch(queued)
    }

    fn execute(&self, queued: QueuedRequest) {
        self.inner.metrics.record_dispatch();

        let queue = self.clone();
        self.inner.executor.spawn(Box::pin(async move {
            let result = queue.process(&queued).await;
            queue.finish_dispatched_io(queued, result);
        }));
    }

    async fn process(&self, queued: &QueuedRequest) -> Result<usize> {
        let backend = self.inner.image.backend();

        match &queued.request {
            ImageRequest::Read {
                offset,
                len,
                op_flags,
            } => {
                let data = backend
                    .read(*offset, *len, *op_flags)
                    .await
                    .map_err(AioError::Backend)?;
                let bytes = data.len();
                self.inner.metrics.record_bytes_read(bytes as u64);
                queued.completion.set_read_data(data);
                Ok(bytes)
            }
            ImageRequest::Write {
                offset,
                data,
                op_flags,
            } => {
                let bytes = backend
                    .write(*offset, data.clone(), *op_flags)
                    .await
                    .map_err(AioError::Backend)?;
                self.inner.metrics.record_bytes_written(bytes as u64);
                Ok(bytes)
            }
            ImageRequest::Discard { offset, len } => backend
                .discard(*offset, *len)
                .await
                .map_err(AioError::Backend),
            ImageRequest::Flush => backend.flush().await.map(|()| 0).map_err(AioError::Backend),
        }
    }

    fn finish_dispatched_io(&self, queued: QueuedRequest, result: Result<usize>) {
        if let Err(err) = &result {
            warn!("{} request failed: {}", queued.request.kind(), err);
        }
        if queued.request.is_write_op() {
            self.finish_in_flight_write();
        }
        self.complete_request(queued, result);
    }

    /// Fail a request that was accepted but never dispatched
    fn fail_queued_io(&self, queued: QueuedRequest, err: AioError) {
        self.inner.counters.finish_queued(queued.direction());
        self.complete_request(queued, Err(err));
    }

    fn complete_request(&self, queued: QueuedRequest, result: Result<usize>) {
        let QueuedRequest {
            completion,
            write_seq,
            ..
        } = queued;

        // counters are released before the caller is woken; idle and shutdown
        // notifications wait for the completion to return
        self.inner.counters.start_finalize();
        self.inner.counters.finish_io();

        self.inner.metrics.record_completion(result.is_ok());
        completion.complete(result);

        // release flushes only after the write's completion has fired
        if let Some(seq) = write_seq {
            let ready = self.inner.state.write().barrier.release(seq);
            for flush in ready {
                self.dispatch(flush);
            }
        }

        self.finish_finalize();
    }

    fn finish_in_flight_write(&self) {
        let drained = {
            let state = self.inner.state.read();
            self.inner.counters.finish_write() == 0 && state.blocker.has_waiters()
        };

        if drained {
            let waiters = self.inner.state.write().blocker.take_waiters();
            debug!("In-flight writes drained, notifying {} blockers", waiters.len());
            self.flush_then(waiters);
        }
    }

    fn finish_finalize(&self) {
        let (idle, shutting_down) = {
            let state = self.inner.state.read();
            self.inner.counters.finish_finalize();
            (self.inner.counters.is_quiescent(), state.shutdown)
        };

        if !idle {
            return;
        }
        self.inner.idle.notify_waiters();

        if shutting_down {
            let on_shutdown = self.inner.state.write().on_shutdown.get_mut().take();
            if let Some(on_shutdown) = on_shutdown {
                info!("Image request queue {} drained", self.inner.config.name);
                self.flush_then(vec![on_shutdown]);
            }
        }
    }

    /// Flush the image, then hand the flush result to every callback in order
    fn flush_then(&self, callbacks: Vec<Callback>) {
        if callbacks.is_empty() {
            return;
        }

        let image = self.inner.image.clone();
        self.inner.executor.spawn(Box::pin(async move {
            let result = image.backend().flush().await.map_err(AioError::Backend);
            for callback in callbacks {
                callback(result.clone());
            }
        }));
    }

    // Write blocker

    /// Whether write dispatch is currently blocked
    pub fn writes_blocked(&self) -> bool {
        self.inner.state.read().blocker.writes_blocked()
    }

    /// Block writes and wait until in-flight writes drain
    ///
    /// Blocks the calling thread; must not be called from within an async
    /// execution context.
    pub fn block_writes(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.block_writes_with(move |result| {
            let _ = tx.send(result);
        });

        match rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(AioError::InternalError(
                "write blocker callback dropped".to_string(),
            )),
        }
    }

    /// Block writes and wait asynchronously until in-flight writes drain
    pub async fn block_writes_async(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.block_writes_with(move |result| {
            let _ = tx.send(result);
        });

        rx.await.map_err(|_| {
            AioError::InternalError("write blocker callback dropped".to_string())
        })?
    }

    /// Block writes; `on_blocked` fires once the writes in flight now have drained
    pub fn block_writes_with<F>(&self, on_blocked: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let ready = {
            let mut state = self.inner.state.write();
            let in_flight_writes = self.inner.counters.in_flight_writes();
            let ready = state.blocker.block(Box::new(on_blocked), in_flight_writes);
            debug!(
                "Blocking writes: blockers={}, in_flight_writes={}",
                state.blocker.blockers(),
                in_flight_writes
            );
            ready
        };

        if let Some(on_blocked) = ready {
            self.flush_then(vec![on_blocked]);
        }
    }

    /// Release one blocker; writes resume when the last one is released
    pub fn unblock_writes(&self) {
        let resumed = {
            let mut state = self.inner.state.write();
            let resumed = state.blocker.unblock();
            debug!("Unblocking writes: blockers={}", state.blocker.blockers());
            resumed
        };

        if !resumed.is_empty() {
            debug!("Resuming {} blocked writes", resumed.len());
        }
        for queued in resumed {
            self.dispatch(queued);
        }
    }

    // Lock coordinator

    /// Change whether `direction` requires the exclusive lock
    pub fn set_require_lock(&self, direction: Direction, enabled: bool) {
        let (resumed, acquiring) = {
            let mut state = self.inner.state.write();
            let resumed = if state.lock.set_require_lock(direction, enabled) {
                state.lock.take_parked()
            } else {
                VecDeque::new()
            };
            (resumed, state.lock.acquiring())
        };

        debug!(
            "Lock requirement updated: direction={:?}, enabled={}, resumed={}, acquiring={}",
            direction,
            enabled,
            resumed.len(),
            acquiring
        );
        for queued in resumed {
            self.dispatch(queued);
        }
    }

    /// Whether some direction requires the exclusive lock and it is not held
    pub fn is_lock_required(&self) -> bool {
        let state = self.inner.state.read();
        state
            .lock
            .is_lock_required(self.inner.image.exclusive_lock().is_lock_owner())
    }

    /// Whether queued requests need the lock and no acquisition is outstanding
    pub fn is_lock_request_needed(&self) -> bool {
        let state = self.inner.state.read();
        state.lock.is_lock_request_needed(
            self.inner.counters.queued_reads(),
            self.inner.counters.queued_writes(),
        )
    }

    fn request_lock(&self) {
        info!("Requesting exclusive lock for image {}", self.inner.image.name());
        self.inner.metrics.record_lock_request();

        let queue = self.clone();
        self.inner.executor.spawn(Box::pin(async move {
            let result = queue.inner.image.exclusive_lock().acquire().await;
            queue.handle_lock_acquired(result);
        }));
    }

    fn handle_lock_acquired(&self, result: BackendResult<()>) {
        let parked = self.inner.state.write().lock.finish_acquire();

        match result {
            Ok(()) => {
                debug!("Exclusive lock acquired, resuming {} requests", parked.len());
                for queued in parked {
                    self.dispatch(queued);
                }
            }
            Err(code) => {
                error!(
                    "Failed to acquire exclusive lock: errno {}, failing {} requests",
                    code,
                    parked.len()
                );
                for queued in parked {
                    self.fail_queued_io(queued, AioError::LockAcquisitionFailed(code));
                }
            }
        }
    }

    // Refresh gate

    fn refresh(&self) {
        info!("Image refresh required: delaying I/O");
        self.inner.metrics.record_refresh();

        let queue = self.clone();
        self.inner.executor.spawn(Box::pin(async move {
            let result = queue.inner.image.state().refresh().await;
            queue.handle_refreshed(result);
        }));
    }

    fn handle_refreshed(&self, result: BackendResult<()>) {
        let parked = self.inner.state.write().refresh.finish();
        info!(
            "Resuming {} requests after image refresh: result={:?}",
            parked.len(),
            result
        );

        let max_retries = self.inner.config.max_refresh_retries;
        for queued in parked {
            match result {
                Err(code) if !may_retry_refresh(queued.refresh_attempts, max_retries) => {
                    self.fail_queued_io(queued, AioError::RefreshFailed(code))
                }
                _ => self.dispatch(queued),
            }
        }
    }

    // Shutdown and draining

    /// Whether every accepted request has been finalized
    pub fn is_empty(&self) -> bool {
        self.inner.counters.in_flight_ios() == 0
    }

    /// Wait until every accepted request has been finalized and its
    /// completion delivered
    pub async fn drain(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.counters.is_quiescent() {
                return;
            }
            notified.await;
        }
    }

    /// Reject new requests; `on_shutdown` fires once accepted ones are finalized
    ///
    /// The image is flushed before `on_shutdown` runs. A second call fails its
    /// callback with `ShuttingDown`.
    pub fn shut_down<F>(&self, on_shutdown: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        let on_shutdown: Callback = Box::new(on_shutdown);

        let ready = {
            let mut state = self.inner.state.write();
            if state.shutdown {
                Err(on_shutdown)
            } else {
                state.shutdown = true;
                if !self.inner.counters.is_quiescent() {
                    *state.on_shutdown.get_mut() = Some(on_shutdown);
                    Ok(None)
                } else {
                    Ok(Some(on_shutdown))
                }
            }
        };

        match ready {
            Ok(ready) => {
                info!(
                    "Shutting down image request queue {}: in_flight_ios={}",
                    self.inner.config.name,
                    self.inner.counters.in_flight_ios()
                );
                if let Some(on_shutdown) = ready {
                    self.flush_then(vec![on_shutdown]);
                }
            }
            Err(on_shutdown) => {
                warn!("Image request queue {} already shutting down", self.inner.config.name);
                on_shutdown(Err(AioError::ShuttingDown));
            }
        }
    }

    /// Shut down and wait asynchronously for the queue to drain
    pub async fn shut_down_async(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shut_down(move |result| {
            let _ = tx.send(result);
        });

        rx.await
            .map_err(|_| AioError::InternalError("shutdown callback dropped".to_string()))?
    }
}
