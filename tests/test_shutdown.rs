mod common;

use common::{finish, setup, wait_until};
use image_io_queue::{AioCompletion, AioError, CounterSnapshot, QueueConfig};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_requests_rejected_after_shutdown() {
    let (queue, memory) = setup(QueueConfig::default());

    queue.shut_down_async().await.unwrap();
    assert_eq!(memory.flush_count(), 1);

    let write = AioCompletion::new();
    queue.submit_write(write.clone(), 0, "late".into(), 0);
    let err = write.result().expect("rejected synchronously").unwrap_err();
    assert_eq!(err, AioError::ShuttingDown);
    assert_eq!(err.to_errno(), -108);

    let read = AioCompletion::new();
    queue.submit_read(read.clone(), 0, 16, 0);
    assert_eq!(finish(&read).await, Err(AioError::ShuttingDown));

    assert!(queue.is_empty());
    assert_eq!(memory.contents(0, 4).unwrap(), vec![0u8; 4]);
    assert_eq!(queue.metrics().get_stats().shutdown_rejections, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_waits_for_parked_requests() {
    let (queue, memory) = setup(QueueConfig::default());

    queue.block_writes_async().await.unwrap();
    let write = AioCompletion::new();
    queue.submit_write(write.clone(), 0, "parked".into(), 0);

    let (tx, mut rx) = oneshot::channel();
    queue.shut_down(move |result| {
        let _ = tx.send(result);
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(rx.try_recv().is_err(), "shutdown finished with a parked write");
    assert!(!write.is_complete());

    // accepted requests still run to completion
    queue.unblock_writes();
    assert_eq!(finish(&write).await, Ok(6));
    assert_eq!(rx.await.unwrap(), Ok(()));
    assert_eq!(memory.contents(0, 6).unwrap(), b"parked");
    assert!(queue.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_waits_for_in_flight_writes() {
    let (queue, memory) = setup(QueueConfig::default());

    memory.set_writes_open(false);
    let write = AioCompletion::new();
    queue.submit_write(write.clone(), 0, "inflight".into(), 0);
    wait_until(|| memory.writes_in_progress() == 1).await;

    let shutdown = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.shut_down_async().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!shutdown.is_finished());

    memory.set_writes_open(true);
    shutdown.await.unwrap().unwrap();
    assert!(write.is_complete());
    assert_eq!(memory.flush_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_shutdown_fails() {
    let (queue, _memory) = setup(QueueConfig::default());

    queue.shut_down_async().await.unwrap();
    assert_eq!(queue.shut_down_async().await, Err(AioError::ShuttingDown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drain_waits_for_all_requests() {
    let (queue, memory) = setup(QueueConfig::default());

    memory.set_writes_open(false);
    let completions: Vec<AioCompletion> = (0..3u64)
        .map(|i| {
            let completion = AioCompletion::new();
            queue.submit_write(completion.clone(), i * 16, "drain".into(), 0);
            completion
        })
        .collect();
    assert!(!queue.is_empty());

    let drain = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.drain().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!drain.is_finished());

    memory.set_writes_open(true);
    tokio::time::timeout(Duration::from_secs(5), drain)
        .await
        .expect("drain did not finish")
        .unwrap();

    assert!(queue.is_empty());
    assert!(completions.iter().all(|c| c.is_complete()));
    assert_eq!(queue.counters(), CounterSnapshot::default());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_waits_for_completion_callbacks() {
    let (queue, memory) = setup(QueueConfig::default());

    memory.set_writes_open(false);
    let delivered = Arc::new(AtomicBool::new(false));
    let write = {
        let delivered = delivered.clone();
        AioCompletion::with_callback(move |_| {
            std::thread::sleep(Duration::from_millis(50));
            delivered.store(true, Ordering::SeqCst);
        })
    };
    queue.submit_write(write.clone(), 0, "slow".into(), 0);
    wait_until(|| memory.writes_in_progress() == 1).await;

    // the callback captures a Cell, so it is Send but not Sync
    let (tx, rx) = oneshot::channel();
    let seen = Cell::new(false);
    let observed = delivered.clone();
    queue.shut_down(move |result| {
        seen.set(observed.load(Ordering::SeqCst));
        let _ = tx.send((result, seen.get()));
    });

    memory.set_writes_open(true);
    let (result, delivered_first) = rx.await.unwrap();
    assert_eq!(result, Ok(()));
    assert!(delivered_first, "shutdown fired before the completion callback returned");
    assert_eq!(finish(&write).await, Ok(4));
    assert!(queue.is_empty());
}
