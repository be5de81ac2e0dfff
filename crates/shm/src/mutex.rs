// SPDX-License-Identifier: Apache-2.0

//! Process-shared robust mutex, constructed in place in mapped memory.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use nix::errno::Errno;

use crate::error::ShmError;

/// A `pthread_mutex_t` with `PROCESS_SHARED` and `ROBUST` attributes.
///
/// Lives inside a shared-memory region; never constructed on the Rust side
/// other than through [`SharedMutex::init_at`]. The destructor is never run
/// (regions are unmapped, not dropped field-by-field).
#[repr(C)]
pub struct SharedMutex {
    inner: UnsafeCell<libc::pthread_mutex_t>,
}

// SAFETY: pthread mutexes are made for cross-thread (and here cross-process)
// use; all access goes through lock/unlock.
unsafe impl Send for SharedMutex {}
unsafe impl Sync for SharedMutex {}

impl SharedMutex {
    /// Initialize the mutex in place.
    ///
    /// # Safety
    ///
    /// `this` must point into writable mapped memory sized for a
    /// `SharedMutex`, and exactly one process may call this before any
    /// other process locks.
    pub unsafe fn init_at(this: *mut SharedMutex) -> Result<(), ShmError> {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
        if rc != 0 {
            return Err(ShmError::Mutex(Errno::from_raw(rc)));
        }
        let attr_ptr = attr.as_mut_ptr();
        let rc = libc::pthread_mutexattr_setpshared(attr_ptr, libc::PTHREAD_PROCESS_SHARED);
        if rc != 0 {
            libc::pthread_mutexattr_destroy(attr_ptr);
            return Err(ShmError::Mutex(Errno::from_raw(rc)));
        }
        let rc = libc::pthread_mutexattr_setrobust(attr_ptr, libc::PTHREAD_MUTEX_ROBUST);
        if rc != 0 {
            libc::pthread_mutexattr_destroy(attr_ptr);
            return Err(ShmError::Mutex(Errno::from_raw(rc)));
        }
        let rc = libc::pthread_mutex_init((*this).inner.get(), attr_ptr);
        libc::pthread_mutexattr_destroy(attr_ptr);
        if rc != 0 {
            return Err(ShmError::Mutex(Errno::from_raw(rc)));
        }
        Ok(())
    }

    /// Lock, recovering from a dead previous owner.
    ///
    /// `recovered` on the guard is true when the previous holder died with
    /// the lock held; the protected data must then be treated as lost.
    pub fn lock(&self) -> Result<SharedMutexGuard<'_>, ShmError> {
        // SAFETY: the mutex was initialized by the region creator before the
        // initialized flag was released.
        let rc = unsafe { libc::pthread_mutex_lock(self.inner.get()) };
        match rc {
            0 => Ok(SharedMutexGuard { mutex: self, recovered: false }),
            libc::EOWNERDEAD => {
                // SAFETY: EOWNERDEAD hands us the lock; marking it
                // consistent is the documented recovery step.
                let rc = unsafe { libc::pthread_mutex_consistent(self.inner.get()) };
                if rc != 0 {
                    // SAFETY: we hold the lock and must release it.
                    unsafe { libc::pthread_mutex_unlock(self.inner.get()) };
                    return Err(ShmError::Mutex(Errno::from_raw(rc)));
                }
                Ok(SharedMutexGuard { mutex: self, recovered: true })
            }
            rc => Err(ShmError::Mutex(Errno::from_raw(rc))),
        }
    }
}

pub struct SharedMutexGuard<'a> {
    mutex: &'a SharedMutex,
    /// The previous owner died while holding the lock.
    pub recovered: bool,
}

impl Drop for SharedMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: guard existence proves we hold the lock.
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.inner.get());
        }
    }
}

#[cfg(test)]
#[path = "mutex_tests.rs"]
mod tests;
