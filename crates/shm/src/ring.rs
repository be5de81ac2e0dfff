// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity ring buffer of fixed-size cells in shared memory.
//!
//! One writer and one reader, usually in different processes; every
//! operation takes the process-shared robust mutex and none of them block
//! beyond it. A full ring sets a sticky overflow flag instead of waiting —
//! consumers read the flag and inject a data-loss event.

use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::error::ShmError;
use crate::mutex::SharedMutex;
use crate::region::ShmRegion;
use crate::ShmSafe;

/// How long `open_in` waits for the creator to finish in-place init.
const INIT_WAIT: Duration = Duration::from_secs(2);
const INIT_POLL: Duration = Duration::from_millis(5);

const INITIALIZED: u32 = 0x5248_494e; // "RING"

#[repr(C)]
struct RingHeader {
    initialized: AtomicU32,
    overflow: AtomicU32,
    capacity: u32,
    elem_size: u32,
    // Cursors and fill level are only touched under the mutex; atomics keep
    // the cross-process aliasing well-defined without an UnsafeCell dance.
    write_head: AtomicU32,
    read_head: AtomicU32,
    len: AtomicU32,
    _pad: u32,
    mutex: SharedMutex,
}

/// Cells start at the next 64-byte boundary after the header.
fn cells_offset() -> usize {
    (mem::size_of::<RingHeader>() + 63) & !63
}

/// A typed ring view over a shared-memory region.
pub struct ShmRing<T: ShmSafe> {
    region: ShmRegion,
    _marker: PhantomData<T>,
}

// SAFETY: all shared state is behind the in-region mutex and atomics.
unsafe impl<T: ShmSafe> Send for ShmRing<T> {}
unsafe impl<T: ShmSafe> Sync for ShmRing<T> {}

impl<T: ShmSafe> ShmRing<T> {
    /// Region size needed for a ring of `capacity` cells.
    pub fn bytes_required(capacity: usize) -> usize {
        cells_offset() + capacity * mem::size_of::<T>()
    }

    /// Construct a ring in a freshly created (zeroed) region.
    pub fn create_in(region: ShmRegion, capacity: usize) -> Result<Self, ShmError> {
        let needed = Self::bytes_required(capacity);
        if region.len() < needed {
            return Err(ShmError::TooSmall { needed, have: region.len() });
        }
        let header = region.as_ptr().cast::<RingHeader>();
        // SAFETY: the region is writable, zeroed, large enough, and we are
        // the only process that knows the name until `initialized` is set.
        unsafe {
            (*header).capacity = capacity as u32;
            (*header).elem_size = mem::size_of::<T>() as u32;
            (*header).overflow = AtomicU32::new(0);
            (*header).write_head = AtomicU32::new(0);
            (*header).read_head = AtomicU32::new(0);
            (*header).len = AtomicU32::new(0);
            SharedMutex::init_at(std::ptr::addr_of_mut!((*header).mutex))?;
            (*header).initialized.store(INITIALIZED, Ordering::Release);
        }
        Ok(Self { region, _marker: PhantomData })
    }

    /// Attach to a ring another process created, waiting for its one-shot
    /// initialization and checking the cell layout against `T`.
    pub fn open_in(region: ShmRegion) -> Result<Self, ShmError> {
        if region.len() < mem::size_of::<RingHeader>() {
            return Err(ShmError::TooSmall {
                needed: mem::size_of::<RingHeader>(),
                have: region.len(),
            });
        }
        let header = region.as_ptr().cast::<RingHeader>();
        let deadline = std::time::Instant::now() + INIT_WAIT;
        // SAFETY: reading the atomic init flag of a mapped header.
        while unsafe { (*header).initialized.load(Ordering::Acquire) } != INITIALIZED {
            if std::time::Instant::now() >= deadline {
                return Err(ShmError::NotInitialized);
            }
            std::thread::sleep(INIT_POLL);
        }
        // SAFETY: initialized flag observed with acquire ordering; the
        // header fields written before the release store are visible.
        let (elem_size, capacity) = unsafe { ((*header).elem_size, (*header).capacity) };
        if elem_size as usize != mem::size_of::<T>() {
            return Err(ShmError::LayoutMismatch {
                expected: mem::size_of::<T>(),
                found: elem_size as usize,
            });
        }
        let needed = Self::bytes_required(capacity as usize);
        if region.len() < needed {
            return Err(ShmError::TooSmall { needed, have: region.len() });
        }
        Ok(Self { region, _marker: PhantomData })
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: validated in create_in/open_in.
        unsafe { &*self.region.as_ptr().cast::<RingHeader>() }
    }

    fn cell(&self, index: u32) -> *mut T {
        // SAFETY: index < capacity is maintained by the cursor arithmetic;
        // the region is sized for `capacity` cells.
        unsafe { self.region.as_ptr().add(cells_offset()).cast::<T>().add(index as usize) }
    }

    /// Take the mutex; a recovered (owner-died) lock empties the ring and
    /// raises the overflow flag so the consumer sees a data loss.
    fn locked(&self) -> Option<crate::mutex::SharedMutexGuard<'_>> {
        let header = self.header();
        let guard = header.mutex.lock().ok()?;
        if guard.recovered {
            header.write_head.store(0, Ordering::Relaxed);
            header.read_head.store(0, Ordering::Relaxed);
            header.len.store(0, Ordering::Relaxed);
            header.overflow.store(1, Ordering::Relaxed);
        }
        Some(guard)
    }

    /// Copy `value` into the ring. On a full ring the sticky overflow flag
    /// is set and `false` returned.
    pub fn try_enqueue(&self, value: T) -> bool {
        let Some(_guard) = self.locked() else { return false };
        let header = self.header();
        if header.len.load(Ordering::Relaxed) == header.capacity {
            header.overflow.store(1, Ordering::Relaxed);
            return false;
        }
        let write = header.write_head.load(Ordering::Relaxed);
        // SAFETY: slot is within capacity and owned by us under the mutex.
        unsafe { self.cell(write).write(value) };
        header.write_head.store((write + 1) % header.capacity, Ordering::Relaxed);
        header.len.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Copy out the oldest element.
    pub fn try_dequeue(&self) -> Option<T> {
        let Some(_guard) = self.locked() else { return None };
        let header = self.header();
        if header.len.load(Ordering::Relaxed) == 0 {
            return None;
        }
        let read = header.read_head.load(Ordering::Relaxed);
        // SAFETY: cell holds a valid T written by try_enqueue.
        let value = unsafe { self.cell(read).read() };
        header.read_head.store((read + 1) % header.capacity, Ordering::Relaxed);
        header.len.fetch_sub(1, Ordering::Relaxed);
        Some(value)
    }

    /// Inspect the oldest element without consuming it.
    pub fn try_peek<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let Some(_guard) = self.locked() else { return None };
        let header = self.header();
        if header.len.load(Ordering::Relaxed) == 0 {
            return None;
        }
        let read = header.read_head.load(Ordering::Relaxed);
        // SAFETY: cell holds a valid T; the reference dies with the guard.
        let value = unsafe { &*self.cell(read) };
        Some(f(value))
    }

    /// Discard the oldest element.
    pub fn try_pop(&self) -> bool {
        let Some(_guard) = self.locked() else { return false };
        let header = self.header();
        if header.len.load(Ordering::Relaxed) == 0 {
            return false;
        }
        let read = header.read_head.load(Ordering::Relaxed);
        header.read_head.store((read + 1) % header.capacity, Ordering::Relaxed);
        header.len.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// Read the sticky overflow flag, optionally resetting it.
    pub fn overflow(&self, reset: bool) -> bool {
        let header = self.header();
        if reset {
            header.overflow.swap(0, Ordering::Relaxed) != 0
        } else {
            header.overflow.load(Ordering::Relaxed) != 0
        }
    }

    pub fn len(&self) -> usize {
        self.header().len.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.header().capacity as usize
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
