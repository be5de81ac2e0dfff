// SPDX-License-Identifier: Apache-2.0

use super::*;
use std::sync::Arc;

fn job(n: u32) -> Job {
    Job { graph: 0, node: n }
}

#[test]
fn fifo_order() {
    let queue = JobQueue::new(4);
    assert!(queue.add(job(1)));
    assert!(queue.add(job(2)));

    assert_eq!(queue.get(Duration::from_millis(10)), Some(job(1)));
    assert_eq!(queue.get(Duration::from_millis(10)), Some(job(2)));
}

#[test]
fn get_times_out_on_empty() {
    let queue = JobQueue::new(4);
    let start = Instant::now();
    assert_eq!(queue.get(Duration::from_millis(20)), None);
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn add_times_out_on_full() {
    let queue = JobQueue::new(1);
    assert!(queue.add_timeout(job(1), Duration::from_millis(5)));
    assert!(!queue.add_timeout(job(2), Duration::from_millis(5)));
}

#[test]
fn consumer_unblocks_producer() {
    let queue = Arc::new(JobQueue::new(1));
    queue.add_timeout(job(1), Duration::from_millis(5));

    let producer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || queue.add_timeout(job(2), Duration::from_millis(500)))
    };
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(queue.get(Duration::from_millis(10)), Some(job(1)));
    assert!(producer.join().unwrap());
    assert_eq!(queue.get(Duration::from_millis(10)), Some(job(2)));
}

#[test]
fn stop_unblocks_waiters() {
    let queue = Arc::new(JobQueue::new(1));
    let consumer = {
        let queue = Arc::clone(&queue);
        std::thread::spawn(move || queue.get(Duration::from_secs(5)))
    };
    std::thread::sleep(Duration::from_millis(10));
    queue.stop();
    assert_eq!(consumer.join().unwrap(), None);
    assert!(!queue.is_running());
    // Adds are rejected after shutdown.
    assert!(!queue.add_timeout(job(1), Duration::from_millis(5)));
}

#[test]
fn multiple_consumers_drain_everything() {
    let queue = Arc::new(JobQueue::new(64));
    for n in 0..32 {
        assert!(queue.add(job(n)));
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = Arc::clone(&queue);
        handles.push(std::thread::spawn(move || {
            let mut got = 0;
            while queue.get(Duration::from_millis(50)).is_some() {
                got += 1;
            }
            got
        }));
    }
    let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, 32);
    assert!(queue.is_empty());
}
