// SPDX-License-Identifier: Apache-2.0

use super::*;
use std::sync::Arc;
use std::time::Instant;

#[test]
fn post_then_wait() {
    let sem = OwnedSemaphore::new(0).unwrap();
    sem.post().unwrap();
    sem.wait().unwrap();
}

#[test]
fn initial_value_counts() {
    let sem = OwnedSemaphore::new(2).unwrap();
    assert!(sem.try_wait().unwrap());
    assert!(sem.try_wait().unwrap());
    assert!(!sem.try_wait().unwrap());
}

#[test]
fn timed_wait_times_out() {
    let sem = OwnedSemaphore::new(0).unwrap();
    let start = Instant::now();
    let outcome = sem.timed_wait(Duration::from_millis(20)).unwrap();
    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn timed_wait_acquires_posted() {
    let sem = OwnedSemaphore::new(1).unwrap();
    assert_eq!(sem.timed_wait(Duration::from_millis(100)).unwrap(), WaitOutcome::Acquired);
}

#[test]
fn wakes_blocked_thread() {
    let sem = Arc::new(OwnedSemaphore::new(0).unwrap());
    let waiter = {
        let sem = Arc::clone(&sem);
        std::thread::spawn(move || sem.timed_wait(Duration::from_secs(5)).unwrap())
    };
    std::thread::sleep(Duration::from_millis(10));
    sem.post().unwrap();
    assert_eq!(waiter.join().unwrap(), WaitOutcome::Acquired);
}
