// SPDX-License-Identifier: Apache-2.0

//! POSIX semaphore wrapper for in-process and process-shared use.
//!
//! `timed_wait` does not use `sem_timedwait`: that call measures against
//! CLOCK_REALTIME and a wall-clock step would distort every timeout in the
//! system. Instead it polls `sem_trywait` on the monotonic clock with a
//! short sleep, which is what the timeouts here (hundreds of milliseconds
//! and up) can afford.

use std::cell::UnsafeCell;
use std::time::{Duration, Instant};

use nix::errno::Errno;

use crate::error::ShmError;

/// Poll step for `timed_wait`.
const TRYWAIT_POLL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Acquired,
    TimedOut,
}

/// A `sem_t` constructed in place. Never moved after `init_at`.
#[repr(C)]
pub struct Semaphore {
    inner: UnsafeCell<libc::sem_t>,
}

// SAFETY: POSIX semaphores synchronize between threads and processes.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Initialize in place with the given value.
    ///
    /// # Safety
    ///
    /// `this` must point to writable memory sized for a `Semaphore` that is
    /// not yet initialized; for `shared`, the memory must be mapped by every
    /// participating process.
    pub unsafe fn init_at(this: *mut Semaphore, value: u32, shared: bool) -> Result<(), ShmError> {
        let pshared = if shared { 1 } else { 0 };
        let rc = libc::sem_init((*this).inner.get(), pshared, value);
        if rc != 0 {
            return Err(ShmError::Sem(Errno::last()));
        }
        Ok(())
    }

    /// Decrement, blocking until available.
    pub fn wait(&self) -> Result<(), ShmError> {
        loop {
            // SAFETY: initialized by contract of `init_at`.
            let rc = unsafe { libc::sem_wait(self.inner.get()) };
            if rc == 0 {
                return Ok(());
            }
            match Errno::last() {
                Errno::EINTR => continue,
                errno => return Err(ShmError::Sem(errno)),
            }
        }
    }

    /// Increment, waking one waiter.
    pub fn post(&self) -> Result<(), ShmError> {
        // SAFETY: initialized by contract of `init_at`.
        let rc = unsafe { libc::sem_post(self.inner.get()) };
        if rc != 0 {
            return Err(ShmError::Sem(Errno::last()));
        }
        Ok(())
    }

    /// Non-blocking decrement. `Ok(true)` when acquired.
    pub fn try_wait(&self) -> Result<bool, ShmError> {
        // SAFETY: initialized by contract of `init_at`.
        let rc = unsafe { libc::sem_trywait(self.inner.get()) };
        if rc == 0 {
            return Ok(true);
        }
        match Errno::last() {
            Errno::EAGAIN | Errno::EINTR => Ok(false),
            errno => Err(ShmError::Sem(errno)),
        }
    }

    /// Decrement, giving up after `timeout` on the monotonic clock.
    pub fn timed_wait(&self, timeout: Duration) -> Result<WaitOutcome, ShmError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(WaitOutcome::Acquired);
            }
            if Instant::now() >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            std::thread::sleep(TRYWAIT_POLL.min(timeout));
        }
    }
}

/// A heap-backed private semaphore for in-process signalling (job queue,
/// node termination waits). The address is stable for the lifetime of the
/// box, which `sem_t` requires.
pub struct OwnedSemaphore {
    inner: Box<Semaphore>,
}

impl OwnedSemaphore {
    pub fn new(value: u32) -> Result<Self, ShmError> {
        let mut inner = Box::new(Semaphore { inner: UnsafeCell::new(unsafe { std::mem::zeroed() }) });
        // SAFETY: freshly allocated, stable address, process-private.
        unsafe { Semaphore::init_at(&mut *inner, value, false)? };
        Ok(Self { inner })
    }
}

impl std::ops::Deref for OwnedSemaphore {
    type Target = Semaphore;

    fn deref(&self) -> &Semaphore {
        &self.inner
    }
}

impl Drop for OwnedSemaphore {
    fn drop(&mut self) {
        // SAFETY: initialized in `new`, destroyed exactly once.
        unsafe {
            libc::sem_destroy(self.inner.inner.get());
        }
    }
}

#[cfg(test)]
#[path = "sem_tests.rs"]
mod tests;
