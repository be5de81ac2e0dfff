// SPDX-License-Identifier: Apache-2.0

//! Monotonic clock abstraction for testable time handling.
//!
//! All supervision timestamps are CLOCK_MONOTONIC nanoseconds so that values
//! produced in different processes on the same machine are comparable. A
//! reading of `0` means "clock failure" and is handled by the supervisions
//! (see the timestamp discipline in the health crate).

#[cfg(any(test, feature = "test-support"))]
use std::sync::Arc;

use nix::sys::time::TimeValLike;
use nix::time::{clock_gettime, ClockId};
#[cfg(any(test, feature = "test-support"))]
use parking_lot::Mutex;

/// Monotonic nanoseconds.
pub type Nanos = u64;

/// A clock that provides monotonic time in nanoseconds.
pub trait MonotonicClock: Send + Sync {
    /// Current monotonic time. Returns `0` when the clock cannot be read.
    fn now_ns(&self) -> Nanos;
}

/// Real CLOCK_MONOTONIC.
#[derive(Clone, Copy, Default)]
pub struct OsClock;

impl MonotonicClock for OsClock {
    fn now_ns(&self) -> Nanos {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => {
                let ns = ts.num_nanoseconds();
                if ns <= 0 {
                    0
                } else {
                    ns as Nanos
                }
            }
            Err(_) => 0,
        }
    }
}

/// Fake clock for tests with controllable time.
#[cfg(any(test, feature = "test-support"))]
#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<Nanos>>,
}

#[cfg(any(test, feature = "test-support"))]
impl FakeClock {
    pub fn new(start: Nanos) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Advance the clock by the given number of nanoseconds.
    pub fn advance(&self, ns: Nanos) {
        *self.now.lock() += ns;
    }

    /// Set the clock to a specific value. `0` simulates clock failure.
    pub fn set(&self, ns: Nanos) {
        *self.now.lock() = ns;
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeClock {
    fn default() -> Self {
        Self::new(1_000_000_000)
    }
}

#[cfg(any(test, feature = "test-support"))]
impl MonotonicClock for FakeClock {
    fn now_ns(&self) -> Nanos {
        *self.now.lock()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
