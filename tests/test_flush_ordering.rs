mod common;

use common::{finish, logged, setup, wait_until};
use image_io_queue::{AioCompletion, AioError, QueueConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_waits_for_earlier_writes() {
    let (queue, memory) = setup(QueueConfig::default());
    let log = Arc::new(Mutex::new(Vec::new()));

    memory.set_writes_open(false);
    let writes: Vec<AioCompletion> = (0..4u64)
        .map(|i| {
            let completion = logged(&log, &format!("write-{}", i));
            queue.submit_write(completion.clone(), i * 32, "ordered".into(), 0);
            completion
        })
        .collect();
    let flush = logged(&log, "flush");
    queue.submit_flush(flush.clone());

    wait_until(|| memory.writes_in_progress() == 4).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!flush.is_complete());
    assert_eq!(memory.flush_count(), 0);
    assert_eq!(queue.metrics().get_stats().parked_on_flush_barrier, 1);

    memory.set_writes_open(true);
    assert_eq!(finish(&flush).await, Ok(0));
    assert!(writes.iter().all(|w| w.is_complete()));

    let log = log.lock();
    assert_eq!(log.len(), 5);
    assert_eq!(log.last().map(String::as_str), Some("flush"));
    assert_eq!(memory.flush_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_without_pending_writes_dispatches_immediately() {
    let (queue, memory) = setup(QueueConfig::default());

    let write = AioCompletion::new();
    queue.submit_write(write.clone(), 0, "done".into(), 0);
    finish(&write).await.unwrap();

    let flush = AioCompletion::new();
    queue.submit_flush(flush.clone());
    assert_eq!(finish(&flush).await, Ok(0));
    assert_eq!(memory.flush_count(), 1);
    assert_eq!(queue.metrics().get_stats().parked_on_flush_barrier, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_not_held_by_later_writes() {
    let (queue, memory) = setup(QueueConfig::default());

    let flush = AioCompletion::new();
    queue.submit_flush(flush.clone());

    memory.set_writes_open(false);
    let write = AioCompletion::new();
    queue.submit_write(write.clone(), 0, "later".into(), 0);

    assert_eq!(finish(&flush).await, Ok(0));
    assert!(!write.is_complete());

    memory.set_writes_open(true);
    assert_eq!(finish(&write).await, Ok(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_write_releases_flush() {
    let (queue, memory) = setup(QueueConfig::default());

    memory.set_writes_open(false);
    let write = AioCompletion::new();
    queue.submit_write(write.clone(), 0, "fails".into(), 0);
    let flush = AioCompletion::new();
    queue.submit_flush(flush.clone());
    wait_until(|| memory.writes_in_progress() == 1).await;

    memory.set_backend_error(Some(-5));
    memory.set_writes_open(true);
    assert_eq!(finish(&write).await, Err(AioError::Backend(-5)));
    // the flush still ran once the write was finalized
    assert_eq!(finish(&flush).await, Err(AioError::Backend(-5)));
    wait_until(|| queue.is_empty()).await;
}
