// SPDX-License-Identifier: Apache-2.0

//! A named shared-memory socket: a ring buffer under a well-known name.
//!
//! Used as the lossy telemetry bus (LM -> HM process states, app -> HM
//! checkpoints) and as the control channel between the lifecycle CLI and
//! the control daemon.

use nix::sys::stat::Mode;

use crate::error::ShmError;
use crate::region::ShmRegion;
use crate::ring::ShmRing;
use crate::ShmSafe;

pub struct ShmSocket<T: ShmSafe> {
    ring: ShmRing<T>,
    name: String,
}

impl<T: ShmSafe> ShmSocket<T> {
    /// Create the server end. The region is unlinked when the socket drops.
    pub fn create(name: &str, capacity: usize, mode: u32) -> Result<Self, ShmError> {
        let region = ShmRegion::create(
            name,
            ShmRing::<T>::bytes_required(capacity),
            Mode::from_bits_truncate(mode),
        )?;
        Ok(Self { ring: ShmRing::create_in(region, capacity)?, name: name.to_string() })
    }

    /// Create the server end with write access restricted to `uid`.
    pub fn create_for_uid(name: &str, capacity: usize, uid: u32) -> Result<Self, ShmError> {
        let region = ShmRegion::create_for_uid(name, ShmRing::<T>::bytes_required(capacity), uid)?;
        Ok(Self { ring: ShmRing::create_in(region, capacity)?, name: name.to_string() })
    }

    /// Attach to an existing socket.
    pub fn connect(name: &str) -> Result<Self, ShmError> {
        let region = ShmRegion::open(name)?;
        Ok(Self { ring: ShmRing::open_in(region)?, name: name.to_string() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn try_send(&self, value: T) -> bool {
        self.ring.try_enqueue(value)
    }

    pub fn try_receive(&self) -> Option<T> {
        self.ring.try_dequeue()
    }

    pub fn try_peek<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.ring.try_peek(f)
    }

    pub fn try_pop(&self) -> bool {
        self.ring.try_pop()
    }

    pub fn overflow(&self, reset: bool) -> bool {
        self.ring.overflow(reset)
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
#[path = "socket_tests.rs"]
mod tests;
