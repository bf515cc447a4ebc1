#![allow(dead_code)]

use image_io_queue::{AioCompletion, ImageRequestQueue, MemoryImage, QueueConfig, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

pub const IMAGE_SIZE: usize = 64 * 1024;

/// Build a queue over a fresh in-memory image, executing on the current runtime
pub fn setup(config: QueueConfig) -> (ImageRequestQueue, Arc<MemoryImage>) {
    let memory = MemoryImage::new(IMAGE_SIZE);
    let queue = ImageRequestQueue::new(
        memory.context("test-image"),
        Arc::new(Handle::current()),
        config,
    )
    .unwrap();
    (queue, memory)
}

/// Poll `condition` until it holds, panicking after five seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

/// Wait for a completion, panicking after five seconds
pub async fn finish(completion: &AioCompletion) -> Result<usize> {
    tokio::time::timeout(Duration::from_secs(5), completion.wait_async())
        .await
        .expect("request not finalized within 5s")
}

/// Completion that appends `label` to `log` when finalized
pub fn logged(log: &Arc<Mutex<Vec<String>>>, label: &str) -> AioCompletion {
    let log = log.clone();
    let label = label.to_string();
    AioCompletion::with_callback(move |_| log.lock().push(label))
}
