// SPDX-License-Identifier: Apache-2.0

//! The per-process lifecycle sync block.
//!
//! The Launch Manager creates an anonymous region per spawned reporting
//! process and passes the descriptor at `SYNC_FD`. The block carries two
//! process-shared semaphores (the `Running` report and the termination
//! notice) plus pid and comms-type metadata. For state-manager processes a
//! [`ControlChannel`] follows the sync block in the same mapping.

use std::mem;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::time::Duration;

use hale_core::process::CommsType;

use crate::control::ControlChannel;
use crate::error::ShmError;
use crate::region::{AnonRegion, ShmRegion};
use crate::sem::{Semaphore, WaitOutcome};

const INITIALIZED: u32 = 0x53_594e43; // "SYNC"

#[repr(C)]
pub struct LifecycleSync {
    initialized: AtomicU32,
    comms_type: AtomicU32,
    pid: AtomicI32,
    running_reported: AtomicU32,
    /// Posted by the child exactly once when it reports `Running`.
    running: Semaphore,
    /// Posted by the Launch Manager before a termination request.
    terminate: Semaphore,
}

fn control_offset() -> usize {
    let base = mem::size_of::<LifecycleSync>();
    let align = mem::align_of::<ControlChannel>().max(8);
    (base + align - 1) & !(align - 1)
}

impl LifecycleSync {
    /// Bytes the mapping needs for a process of the given comms type.
    pub fn layout_size(comms: CommsType) -> usize {
        match comms {
            CommsType::ControlClient => control_offset() + mem::size_of::<ControlChannel>(),
            _ => mem::size_of::<LifecycleSync>(),
        }
    }

    /// # Safety
    ///
    /// `this` must point to writable zeroed mapped memory of at least
    /// [`LifecycleSync::layout_size`] bytes; only the creator calls this.
    unsafe fn init_at(this: *mut LifecycleSync, comms: CommsType) -> Result<(), ShmError> {
        Semaphore::init_at(addr_of_mut!((*this).running), 0, true)?;
        Semaphore::init_at(addr_of_mut!((*this).terminate), 0, true)?;
        (*this).comms_type.store(comms as u8 as u32, Ordering::Relaxed);
        (*this).initialized.store(INITIALIZED, Ordering::Release);
        Ok(())
    }

    pub fn comms_type(&self) -> CommsType {
        CommsType::from_u8(self.comms_type.load(Ordering::Relaxed) as u8)
            .unwrap_or(CommsType::NoComms)
    }

    pub fn set_pid(&self, pid: i32) {
        self.pid.store(pid, Ordering::Relaxed);
    }

    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::Relaxed)
    }

    /// Child side: report `Running`. Returns false when it was already
    /// reported through this block (the report is exactly-once).
    pub fn report_running(&self) -> bool {
        if self.running_reported.swap(1, Ordering::AcqRel) != 0 {
            return false;
        }
        self.running.post().is_ok()
    }

    /// LM side: wait for the `Running` report with the configured startup
    /// timeout.
    pub fn wait_running(&self, timeout: Duration) -> Result<WaitOutcome, ShmError> {
        self.running.timed_wait(timeout)
    }

    /// LM side: signal the upcoming termination request.
    pub fn post_terminate_notice(&self) {
        let _ = self.terminate.post();
    }

    /// Child side: poll the termination notice.
    pub fn termination_requested(&self) -> bool {
        self.terminate.try_wait().unwrap_or(false)
    }

    /// Rearm the `Running` gate for a restart of the same node.
    pub fn rearm(&self) {
        self.running_reported.store(0, Ordering::Release);
        while self.running.try_wait().unwrap_or(false) {}
        while self.terminate.try_wait().unwrap_or(false) {}
    }
}

/// A mapped sync block: the LM side owns the region and the descriptor to
/// pass to the child; the child side maps `SYNC_FD`.
pub struct SyncBlock {
    region: ShmRegion,
}

impl SyncBlock {
    /// LM side: create the block (plus control channel for state managers)
    /// and the descriptor destined for the child's `SYNC_FD`.
    pub fn create(comms: CommsType) -> Result<(Self, OwnedFd), ShmError> {
        let AnonRegion { region, fd } = AnonRegion::create(LifecycleSync::layout_size(comms))?;
        let sync = region.as_ptr().cast::<LifecycleSync>();
        // SAFETY: fresh zeroed anonymous region sized by layout_size.
        unsafe {
            LifecycleSync::init_at(sync, comms)?;
            if comms == CommsType::ControlClient {
                let chan = region.as_ptr().add(control_offset()).cast::<ControlChannel>();
                ControlChannel::init_at(chan)?;
            }
        }
        Ok((Self { region }, fd))
    }

    /// Child side: map the block from the inherited [`SYNC_FD`]
    /// (the process startup contract).
    ///
    /// [`SYNC_FD`]: hale_core::limits::SYNC_FD
    pub fn from_sync_fd() -> Result<Self, ShmError> {
        // SAFETY: SYNC_FD is owned by the runtime for the process lifetime
        // per the startup contract; we only borrow it for the mmap.
        let fd = unsafe { BorrowedFd::borrow_raw(hale_core::limits::SYNC_FD) };
        Self::from_fd(fd)
    }

    /// Child side: map the block from an inherited descriptor.
    pub fn from_fd(fd: BorrowedFd<'_>) -> Result<Self, ShmError> {
        // SAFETY: plain fstat on a descriptor we hold borrowed.
        let len = unsafe {
            let mut st: libc::stat = mem::zeroed();
            if libc::fstat(std::os::fd::AsRawFd::as_raw_fd(&fd), &mut st) != 0 {
                return Err(ShmError::Io(nix::errno::Errno::last()));
            }
            st.st_size as usize
        };
        if len < mem::size_of::<LifecycleSync>() {
            return Err(ShmError::TooSmall { needed: mem::size_of::<LifecycleSync>(), have: len });
        }
        let region = ShmRegion::from_fd(fd, len)?;
        let block = Self { region };
        if block.sync().initialized.load(Ordering::Acquire) != INITIALIZED {
            return Err(ShmError::NotInitialized);
        }
        Ok(block)
    }

    pub fn sync(&self) -> &LifecycleSync {
        // SAFETY: region length checked at construction.
        unsafe { &*self.region.as_ptr().cast::<LifecycleSync>() }
    }

    /// The control channel of a state-manager block.
    pub fn control(&self) -> Option<&ControlChannel> {
        if self.sync().comms_type() != CommsType::ControlClient {
            return None;
        }
        if self.region.len() < control_offset() + mem::size_of::<ControlChannel>() {
            return None;
        }
        // SAFETY: length checked; the channel was initialized by `create`.
        let chan = unsafe { &*self.region.as_ptr().add(control_offset()).cast::<ControlChannel>() };
        chan.is_initialized().then_some(chan)
    }
}

#[cfg(test)]
#[path = "sync_block_tests.rs"]
mod tests;
