// SPDX-License-Identifier: Apache-2.0

//! The bidirectional control channel between a state manager and the
//! Launch Manager, plus the global handler-nudge semaphore.
//!
//! A channel carries one request slot (SM -> LM) and one response slot
//! (LM -> SM). Each slot is an atomic `empty` flag over a fixed message;
//! the writer may only fill an empty slot, the reader frees it. The client
//! blocks on its own wake semaphore for responses; the LM handler is woken
//! through the global nudge, never through per-channel semaphores, so
//! producers never block to nudge.

use std::cell::UnsafeCell;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use hale_core::limits::HANDLER_NUDGE_SHM_NAME;
use hale_core::wire::ControlMessage;

use crate::error::ShmError;
use crate::region::ShmRegion;
use crate::sem::{Semaphore, WaitOutcome};

const INITIALIZED: u32 = 0x4354_524c; // "CTRL"

/// Delay between attempts to place a message into a busy slot. The client
/// has no timeout here: if the LM is gone the watchdog acts, not us.
const SLOT_RETRY: Duration = Duration::from_millis(5);

/// One direction of the channel.
#[repr(C)]
pub struct ControlSlot {
    /// 1 while a message may be placed, 0 while one may be read.
    empty: AtomicU32,
    _pad: u32,
    msg: UnsafeCell<ControlMessage>,
}

impl ControlSlot {
    /// Write into an empty slot. Returns false while the previous message
    /// has not been consumed.
    pub fn try_write(&self, msg: &ControlMessage) -> bool {
        if self.empty.load(Ordering::Acquire) == 0 {
            return false;
        }
        // SAFETY: slot is empty, so the peer does not read it; the release
        // store below publishes the message bytes.
        unsafe { self.msg.get().write(*msg) };
        self.empty.store(0, Ordering::Release);
        true
    }

    /// Read a pending message and free the slot.
    pub fn try_read(&self) -> Option<ControlMessage> {
        if self.empty.load(Ordering::Acquire) != 0 {
            return None;
        }
        // SAFETY: slot is full and the peer does not write until we free it.
        let msg = unsafe { self.msg.get().read() };
        self.empty.store(1, Ordering::Release);
        Some(msg)
    }

    pub fn is_empty(&self) -> bool {
        self.empty.load(Ordering::Acquire) != 0
    }
}

/// The per-state-manager channel, placed in the process's sync mapping.
#[repr(C)]
pub struct ControlChannel {
    initialized: AtomicU32,
    /// Initial-machine-state requests parked on this channel while the
    /// result is not yet known.
    initial_result_requests: AtomicU32,
    request: ControlSlot,
    response: ControlSlot,
    client_wake: Semaphore,
}

impl ControlChannel {
    /// Construct in place in zeroed mapped memory.
    ///
    /// # Safety
    ///
    /// `this` must point to writable, zeroed memory of at least
    /// `size_of::<ControlChannel>()` bytes, mapped by all participants, and
    /// only the creating process may call this.
    pub unsafe fn init_at(this: *mut ControlChannel) -> Result<(), ShmError> {
        (*this).request.empty = AtomicU32::new(1);
        (*this).response.empty = AtomicU32::new(1);
        Semaphore::init_at(addr_of_mut!((*this).client_wake), 0, true)?;
        (*this).initialized.store(INITIALIZED, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire) == INITIALIZED
    }

    // -- client side ------------------------------------------------------

    /// Non-blocking request write, without the handler nudge.
    pub fn try_post_request(&self, msg: &ControlMessage) -> bool {
        self.request.try_write(msg)
    }

    /// Place a request and nudge the Launch Manager handler. Blocks until
    /// the slot accepts the message; there is no timeout by design.
    pub fn send_request(&self, msg: &ControlMessage, nudge: &HandlerNudge) -> Result<(), ShmError> {
        while !self.try_post_request(msg) {
            std::thread::sleep(SLOT_RETRY);
        }
        nudge.post()
    }

    /// Block until the Launch Manager posts into the response slot.
    pub fn wait_response(&self) -> Result<ControlMessage, ShmError> {
        loop {
            self.client_wake.wait()?;
            if let Some(msg) = self.response.try_read() {
                return Ok(msg);
            }
        }
    }

    /// Bounded variant of [`ControlChannel::wait_response`].
    pub fn wait_response_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<ControlMessage>, ShmError> {
        match self.client_wake.timed_wait(timeout)? {
            WaitOutcome::Acquired => Ok(self.response.try_read()),
            WaitOutcome::TimedOut => Ok(None),
        }
    }

    // -- server side ------------------------------------------------------

    /// Pick up a pending request, acknowledging it (the slot becomes
    /// writable again immediately).
    pub fn try_take_request(&self) -> Option<ControlMessage> {
        self.request.try_read()
    }

    pub fn has_request(&self) -> bool {
        !self.request.is_empty()
    }

    /// Post a response or async event and wake the client. Returns false
    /// when the previous response has not been consumed yet.
    pub fn post_response(&self, msg: &ControlMessage) -> bool {
        if !self.response.try_write(msg) {
            return false;
        }
        let _ = self.client_wake.post();
        true
    }

    /// Park one initial-machine-state request on this channel.
    pub fn note_initial_request(&self) {
        self.initial_result_requests.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of parked initial-machine-state requests, leaving one marker
    /// behind so the reply is delivered at most once per request.
    pub fn take_initial_requests(&self) -> u32 {
        self.initial_result_requests.swap(0, Ordering::AcqRel)
    }
}

#[repr(C)]
struct NudgeBlock {
    initialized: AtomicU32,
    sem: Semaphore,
}

/// The global semaphore that wakes the Launch Manager control handler:
/// client requests, graph completions and the recovery forwarder all post
/// it. Lives in its own tiny named region owned by the LM.
pub struct HandlerNudge {
    region: ShmRegion,
}

impl HandlerNudge {
    pub fn create() -> Result<Self, ShmError> {
        Self::create_named(HANDLER_NUDGE_SHM_NAME)
    }

    pub fn open() -> Result<Self, ShmError> {
        Self::open_named(HANDLER_NUDGE_SHM_NAME)
    }

    pub fn create_named(name: &str) -> Result<Self, ShmError> {
        let region = ShmRegion::create(
            name,
            std::mem::size_of::<NudgeBlock>(),
            nix::sys::stat::Mode::from_bits_truncate(0o666),
        )?;
        let block = region.as_ptr().cast::<NudgeBlock>();
        // SAFETY: fresh zeroed region sized for NudgeBlock.
        unsafe {
            Semaphore::init_at(addr_of_mut!((*block).sem), 0, true)?;
            (*block).initialized.store(INITIALIZED, Ordering::Release);
        }
        Ok(Self { region })
    }

    pub fn open_named(name: &str) -> Result<Self, ShmError> {
        let region = ShmRegion::open(name)?;
        if region.len() < std::mem::size_of::<NudgeBlock>() {
            return Err(ShmError::TooSmall {
                needed: std::mem::size_of::<NudgeBlock>(),
                have: region.len(),
            });
        }
        let this = Self { region };
        if this.block().initialized.load(Ordering::Acquire) != INITIALIZED {
            return Err(ShmError::NotInitialized);
        }
        Ok(this)
    }

    fn block(&self) -> &NudgeBlock {
        // SAFETY: size checked at create/open.
        unsafe { &*self.region.as_ptr().cast::<NudgeBlock>() }
    }

    pub fn post(&self) -> Result<(), ShmError> {
        self.block().sem.post()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<WaitOutcome, ShmError> {
        self.block().sem.timed_wait(timeout)
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
