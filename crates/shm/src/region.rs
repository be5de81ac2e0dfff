// SPDX-License-Identifier: Apache-2.0

//! Named and anonymous shared-memory regions.
//!
//! A server creates a region (`shm_open` + `ftruncate` + `mmap`) and unlinks
//! the name when it drops; clients map the existing name read-write.
//! Anonymous regions back the per-process lifecycle sync blocks: they are
//! `shm_open`ed under a throwaway name, unlinked immediately, and live on
//! through the file descriptor handed to the child process.

use std::fs::File;
use std::num::NonZeroUsize;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::process;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use libc::off_t;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

use crate::error::ShmError;

static ANON_REGION_ID: AtomicU32 = AtomicU32::new(0);

fn map_fd<F: AsFd>(fd: F, len: usize) -> Result<NonNull<libc::c_void>, ShmError> {
    let length = NonZeroUsize::new(len).ok_or(ShmError::TooSmall { needed: 1, have: 0 })?;
    // SAFETY: mapping a freshly truncated or fstat-sized fd MAP_SHARED; the
    // kernel owns the backing object, no aliasing constraints are violated.
    unsafe {
        mmap(None, length, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE, MapFlags::MAP_SHARED, fd, 0)
    }
    .map_err(ShmError::Map)
}

/// A mapped shared-memory region. The creator unlinks the name on drop.
#[derive(Debug)]
pub struct ShmRegion {
    ptr: NonNull<libc::c_void>,
    len: usize,
    /// `Some` when this handle owns the name and must unlink it.
    unlink: Option<String>,
}

// SAFETY: the region is plain memory; all structured access goes through the
// process-shared primitives built on top of it.
unsafe impl Send for ShmRegion {}
unsafe impl Sync for ShmRegion {}

impl ShmRegion {
    /// Create and map a named region of `len` bytes. An existing object
    /// under the same name is replaced so a crashed predecessor cannot leave
    /// a stale layout behind.
    pub fn create(name: &str, len: usize, mode: Mode) -> Result<Self, ShmError> {
        let _ = shm_unlink(name);
        let fd = shm_open(name, OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR, mode)
            .map_err(|source| ShmError::Create { name: name.to_string(), source })?;
        ftruncate(&fd, len as off_t)
            .map_err(|source| ShmError::Create { name: name.to_string(), source })?;
        let ptr = map_fd(&fd, len)?;
        Ok(Self { ptr, len, unlink: Some(name.to_string()) })
    }

    /// Create a named region writable by the given uid only (checkpoint
    /// rings: the application writes, the daemon reads).
    pub fn create_for_uid(name: &str, len: usize, uid: u32) -> Result<Self, ShmError> {
        let _ = shm_unlink(name);
        let fd = shm_open(name, OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR, Mode::from_bits_truncate(0o600))
            .map_err(|source| ShmError::Create { name: name.to_string(), source })?;
        // SAFETY: plain fchown/fchmod on an fd we own.
        let rc = unsafe { libc::fchown(fd.as_raw_fd(), uid, libc::gid_t::MAX) };
        if rc != 0 {
            return Err(ShmError::Create { name: name.to_string(), source: Errno::last() });
        }
        let rc = unsafe { libc::fchmod(fd.as_raw_fd(), 0o600) };
        if rc != 0 {
            return Err(ShmError::Create { name: name.to_string(), source: Errno::last() });
        }
        ftruncate(&fd, len as off_t)
            .map_err(|source| ShmError::Create { name: name.to_string(), source })?;
        let ptr = map_fd(&fd, len)?;
        Ok(Self { ptr, len, unlink: Some(name.to_string()) })
    }

    /// Map an existing named region read-write. The size is taken from the
    /// object itself.
    pub fn open(name: &str) -> Result<Self, ShmError> {
        let fd = shm_open(name, OFlag::O_RDWR, Mode::empty())
            .map_err(|source| ShmError::Open { name: name.to_string(), source })?;
        let file = File::from(fd);
        let len = file.metadata()?.len() as usize;
        let ptr = map_fd(&file, len)?;
        Ok(Self { ptr, len, unlink: None })
    }

    /// Map `len` bytes of an already open descriptor (the child side of the
    /// lifecycle sync contract).
    pub fn from_fd<F: AsFd>(fd: F, len: usize) -> Result<Self, ShmError> {
        let ptr = map_fd(fd, len)?;
        Ok(Self { ptr, len, unlink: None })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and are unmapped once.
        unsafe {
            let _ = munmap(self.ptr, self.len);
        }
        if let Some(name) = self.unlink.take() {
            let _ = shm_unlink(name.as_str());
        }
    }
}

/// An anonymous region plus the descriptor that keeps it alive across
/// `fork`/`exec`. Backs the per-process lifecycle sync block.
#[derive(Debug)]
pub struct AnonRegion {
    pub region: ShmRegion,
    pub fd: OwnedFd,
}

impl AnonRegion {
    pub fn create(len: usize) -> Result<Self, ShmError> {
        let name = format!(
            "/hale-anon-{}-{}",
            process::id(),
            ANON_REGION_ID.fetch_add(1, Ordering::Relaxed)
        );
        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(0o600),
        )
        .map_err(|source| ShmError::Create { name: name.clone(), source })?;
        // The name exists only long enough to obtain the descriptor.
        let _ = shm_unlink(name.as_str());
        ftruncate(&fd, len as off_t)
            .map_err(|source| ShmError::Create { name: name.clone(), source })?;
        let ptr = map_fd(&fd, len)?;
        Ok(Self { region: ShmRegion { ptr, len, unlink: None }, fd })
    }
}

#[cfg(test)]
#[path = "region_tests.rs"]
mod tests;
