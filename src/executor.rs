//! Task execution for dispatched requests
//!
//! The queue hands every ready request, lock acquisition and refresh to a
//! [`TaskExecutor`]. A tokio runtime handle is the usual executor;
//! [`WorkerPool`] builds a dedicated fixed-size runtime from the queue config.

use crate::config::QueueConfig;
use crate::error::Result;
use std::future::Future;
use std::pin::Pin;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::info;

/// Opaque unit of work
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Executor accepting work items
pub trait TaskExecutor: Send + Sync {
    fn spawn(&self, task: Task);
}

impl TaskExecutor for Handle {
    fn spawn(&self, task: Task) {
        // completion is reported by the task itself
        drop(Handle::spawn(self, task));
    }
}

/// Fixed pool of worker threads
///
/// Owns its runtime; hand queues [`WorkerPool::handle`] and drop the pool from
/// a plain thread, never from inside one of its own tasks.
pub struct WorkerPool {
    runtime: Runtime,
    worker_threads: usize,
}

impl WorkerPool {
    /// Build the pool described by `config`
    pub fn new(config: &QueueConfig) -> Result<Self> {
        config.validate()?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .enable_all()
            .build()?;

        info!(
            "Started worker pool: threads={}, thread_name={}",
            config.worker_threads, config.thread_name
        );

        Ok(WorkerPool {
            runtime,
            worker_threads: config.worker_threads,
        })
    }

    /// Handle usable as an executor that does not keep the pool alive
    pub fn handle(&self) -> Handle {
        self.runtime.handle().clone()
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    /// Run a future to completion on the pool
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
