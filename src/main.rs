//! Image I/O Queue demo
//!
//! Opens an in-memory image behind an image request queue and walks through
//! the queue's gates: plain I/O, write blocking, exclusive lock acquisition,
//! metadata refresh and shutdown.

use anyhow::Context;
use image_io_queue::{
    AioCompletion, Direction, ImageRequestQueue, MemoryImage, QueueConfig, WorkerPool,
};
use std::env;
use std::sync::mpsc;
use std::sync::Arc;
use tracing::info;

const IMAGE_SIZE: usize = 4 * 1024 * 1024;

/// Main entry point for the demo
///
/// # Usage
/// ```bash
/// # Run with the default configuration
/// cargo run
///
/// # Run with a custom configuration
/// cargo run -- demos/image_io_queue.yaml
/// ```
fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting image I/O queue demo");

    let config = match env::args().nth(1) {
        Some(path) => {
            info!("Loading configuration from: {}", path);
            QueueConfig::from_file(&path)
                .with_context(|| format!("failed to load configuration from {}", path))?
        }
        None => {
            info!("No configuration file given, using defaults");
            QueueConfig::default()
        }
    };

    info!("Configuration loaded successfully");
    info!("  - Queue name: {}", config.name);
    info!("  - Worker threads: {}", config.worker_threads);
    info!("  - Require lock on read: {}", config.require_lock_on_read);
    info!("  - Require lock on write: {}", config.require_lock_on_write);
    info!("  - Auto request lock: {}", config.auto_request_lock);
    info!("  - Max refresh retries: {}", config.max_refresh_retries);

    let pool = WorkerPool::new(&config).context("failed to start worker pool")?;
    let memory = MemoryImage::new(IMAGE_SIZE);
    let queue = ImageRequestQueue::new(
        memory.context("demo-image"),
        Arc::new(pool.handle()),
        config,
    )
    .context("failed to create image request queue")?;

    // Plain synchronous I/O
    let written = queue.write(0, b"image io queue", 0)?;
    let mut buf = vec![0u8; written];
    queue.read(0, &mut buf, 0)?;
    info!("Read back {} bytes: {:?}", buf.len(), String::from_utf8_lossy(&buf));

    let discarded = queue.discard(4096, 8192)?;
    queue.flush()?;
    info!("Discarded {} bytes, flushes={}", discarded, memory.flush_count());

    // Writes submitted while blocked wait for unblock
    queue.block_writes()?;
    let blocked_write = AioCompletion::new();
    queue.submit_write(blocked_write.clone(), 8192, "held back".into(), 0);
    info!(
        "Writes blocked: parked={}, write complete={}",
        queue.parked_requests(),
        blocked_write.is_complete()
    );
    queue.unblock_writes();
    blocked_write.wait()?;
    info!("Blocked write finished after unblock");

    // Lock requirement: the first write triggers a single acquisition
    memory.set_lock_owner(false);
    queue.set_require_lock(Direction::Write, true);
    info!("Lock required: {}", queue.is_lock_required());
    queue.write(16384, b"needs the lock", 0)?;
    info!(
        "Write finished after {} lock request(s), lock required: {}",
        memory.lock_request_count(),
        queue.is_lock_required()
    );

    // Stale metadata: requests wait for one refresh
    memory.mark_stale();
    queue.read(0, &mut buf, 0)?;
    info!("Read finished after {} refresh(es)", memory.refresh_count());

    let stats = queue.metrics().get_stats();
    info!("=== Queue statistics ===");
    info!("  Submitted: {}", stats.total_submitted());
    info!("  Dispatched: {}", stats.requests_dispatched);
    info!("  Completed: {}", stats.requests_completed);
    info!("  Failure rate: {:.1}%", stats.failure_rate());
    info!("  Parked: {}", stats.total_parked());
    info!("  Bytes read: {}", stats.bytes_read);
    info!("  Bytes written: {}", stats.bytes_written);

    let (tx, rx) = mpsc::channel();
    queue.shut_down(move |result| {
        let _ = tx.send(result);
    });
    rx.recv().context("shutdown callback dropped")??;

    let rejected = queue.write(0, b"too late", 0);
    info!("Write after shutdown: {:?}", rejected);
    info!("Demo complete");
    Ok(())
}
