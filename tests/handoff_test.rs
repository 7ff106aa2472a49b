//! Integration tests for the worker-to-drudger hand-off queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use signerd::core::{HandoffQueue, QueueError};

#[test]
fn capacity_is_never_exceeded() {
    let queue = Arc::new(HandoffQueue::new(3, 1));
    let exit = Arc::new(AtomicBool::new(false));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..50 {
                    queue.push(p * 100 + i).unwrap();
                    assert!(queue.len() <= 3);
                }
            })
        })
        .collect();

    let consumer = {
        let queue = Arc::clone(&queue);
        let exit = Arc::clone(&exit);
        thread::spawn(move || {
            let mut got = Vec::new();
            while got.len() < 200 {
                if let Some(item) = queue.pop(&exit) {
                    got.push(item);
                }
            }
            got
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }
    let mut got = consumer.join().unwrap();
    assert_eq!(got.len(), 200);

    // per-producer order is preserved
    for p in 0..4 {
        let mine: Vec<_> = got.iter().copied().filter(|v| v / 100 == p).collect();
        assert!(mine.windows(2).all(|w| w[0] < w[1]));
    }
    got.sort_unstable();
    got.dedup();
    assert_eq!(got.len(), 200);
}

#[test]
fn consumers_wait_for_threshold_or_kick() {
    let queue = Arc::new(HandoffQueue::new(10, 3));
    let exit = Arc::new(AtomicBool::new(false));
    let consumer = {
        let queue = Arc::clone(&queue);
        let exit = Arc::clone(&exit);
        thread::spawn(move || queue.pop(&exit))
    };

    thread::sleep(Duration::from_millis(50));
    queue.push(1).unwrap();
    thread::sleep(Duration::from_millis(50));
    // below threshold, the sleeping consumer was not woken
    assert_eq!(queue.len(), 1);

    queue.kick();
    assert_eq!(consumer.join().unwrap(), Some(1));
    assert!(queue.is_empty());
}

#[test]
fn exit_flag_releases_consumer() {
    let queue = Arc::new(HandoffQueue::<u8>::new(4, 1));
    let exit = Arc::new(AtomicBool::new(false));
    let consumer = {
        let queue = Arc::clone(&queue);
        let exit = Arc::clone(&exit);
        thread::spawn(move || queue.pop(&exit))
    };
    thread::sleep(Duration::from_millis(50));
    exit.store(true, Ordering::Release);
    queue.wake_all();
    assert_eq!(consumer.join().unwrap(), None);
    assert!(!queue.is_closed());
}

#[test]
fn close_fails_blocked_producer_and_drain_empties() {
    let queue = Arc::new(HandoffQueue::new(1, 1));
    queue.push("first").unwrap();
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.push("second"))
    };
    thread::sleep(Duration::from_millis(50));
    queue.close();
    assert_eq!(producer.join().unwrap(), Err(QueueError::Closed));
    assert_eq!(queue.drain(), vec!["first"]);
    assert!(queue.is_empty());
}
