//! Image I/O Queue
//!
//! An asynchronous I/O dispatch engine for a virtual block-device image. It
//! accepts reads, writes, discards and flushes from many client threads,
//! holds them back while the image is not in a state to serve them, and hands
//! them to a worker pool once it is.
//!
//! # Overview
//!
//! Every request flows through an [`ImageRequestQueue`]. Before a request is
//! executed against the image it must pass a series of gates:
//!
//! - **Shutdown**: once the queue is shut down new requests fail with
//!   [`AioError::ShuttingDown`]
//! - **Exclusive lock**: when a direction requires the lock and this client
//!   does not hold it, requests park and a single acquisition is started
//! - **Write blocker**: maintenance operations block writes and are told when
//!   in-flight writes have drained
//! - **Refresh**: while image metadata is stale, requests park behind a single
//!   refresh, retried once by default
//! - **Flush barrier**: a flush waits for every write submitted before it
//!
//! Each request's result is delivered through its [`AioCompletion`] exactly
//! once, whether it executed or failed at a gate.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use image_io_queue::{ImageRequestQueue, MemoryImage, QueueConfig, WorkerPool};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueueConfig::default();
//! let pool = WorkerPool::new(&config)?;
//! let image = MemoryImage::new(1 << 20).context("disk0");
//!
//! let queue = ImageRequestQueue::new(image, Arc::new(pool.handle()), config)?;
//! queue.write(0, b"hello", 0)?;
//!
//! let mut buf = [0u8; 5];
//! queue.read(0, &mut buf, 0)?;
//! queue.flush()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Asynchronous Submission
//!
//! ```rust,no_run
//! use image_io_queue::{AioCompletion, ImageRequestQueue};
//!
//! # async fn submit(queue: ImageRequestQueue) -> image_io_queue::Result<()> {
//! let completion = AioCompletion::with_callback(|result| {
//!     println!("read finished: {:?}", result);
//! });
//! queue.submit_read(completion.clone(), 0, 4096, 0);
//!
//! let bytes = completion.wait_async().await?;
//! let data = completion.take_read_data();
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from a YAML file; every field has a default:
//!
//! ```yaml
//! name: "disk0-queue"
//! worker_threads: 4
//! thread_name: "image-io-wq"
//! require_lock_on_read: false
//! require_lock_on_write: true
//! auto_request_lock: true
//! max_refresh_retries: 1
//! ```
//!
//! See [`QueueConfig`] for the validation rules.
//!
//! # Architecture
//!
//! - [`ImageRequestQueue`]: submission, gating and dispatch
//! - [`ImageContext`]: the image and its collaborators ([`ImageBackend`],
//!   [`ExclusiveLock`], [`ImageRefresh`])
//! - [`TaskExecutor`] / [`WorkerPool`]: where dispatched work runs
//! - [`CounterSet`]: lock-free queued and in-flight counters
//! - [`QueueMetrics`]: runtime statistics
//! - [`MemoryImage`]: in-memory collaborators for tests and demos

pub mod completion;
pub mod config;
pub mod counters;
pub mod error;
pub mod executor;
pub mod image;
mod lock_coordinator;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod queue;
mod refresh_gate;
mod write_blocker;

// Re-export commonly used types
pub use completion::{AioCompletion, CompletionCallback};
pub use config::QueueConfig;
pub use counters::{CounterSet, CounterSnapshot};
pub use error::{AioError, BackendResult, Result};
pub use executor::{Task, TaskExecutor, WorkerPool};
pub use image::{ExclusiveLock, ImageBackend, ImageContext, ImageRefresh};
pub use memory::MemoryImage;
pub use metrics::{MetricsSnapshot, ParkReason, QueueMetrics};
pub use models::{Callback, Direction, ImageRequest};
pub use queue::ImageRequestQueue;
