// SPDX-License-Identifier: Apache-2.0

//! Bounded MPMC queue feeding the worker pool.
//!
//! Producers and consumers wait at most [`MAX_QUEUE_DELAY`]; a timeout is a
//! failure signal (the graph aborts), never a retry cue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use hale_core::limits::MAX_QUEUE_DELAY;
use parking_lot::{Condvar, Mutex};

/// One unit of work: a node of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub graph: usize,
    pub node: u32,
}

pub struct JobQueue {
    items: Mutex<VecDeque<Job>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    running: AtomicBool,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            running: AtomicBool::new(true),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enqueue, waiting up to [`MAX_QUEUE_DELAY`] for space.
    pub fn add(&self, job: Job) -> bool {
        self.add_timeout(job, MAX_QUEUE_DELAY)
    }

    pub fn add_timeout(&self, job: Job, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.len() == self.capacity {
            if !self.is_running() {
                return false;
            }
            if self.not_full.wait_until(&mut items, deadline).timed_out() {
                return false;
            }
        }
        if !self.is_running() {
            return false;
        }
        items.push_back(job);
        drop(items);
        self.not_empty.notify_one();
        true
    }

    /// Dequeue, waiting up to `timeout`. `None` on timeout or shutdown.
    pub fn get(&self, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if !self.is_running() {
                return None;
            }
            if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                return None;
            }
        }
        let job = items.pop_front();
        drop(items);
        self.not_full.notify_one();
        job
    }

    /// Shut the queue down, unblocking every waiter.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
