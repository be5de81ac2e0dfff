// SPDX-License-Identifier: Apache-2.0

//! Lossy process-state bus from the Launch Manager to the Health Monitor.

use hale_core::limits::{PROCESS_STATE_RING_CAPACITY, PROCESS_STATE_SHM_NAME};
use hale_core::wire::PosixProcessRecord;
use hale_core::{IdentifierHash, MonotonicClock, OsClock, ProcessState};
use hale_shm::{ShmError, ShmSocket};
use tracing::trace;

/// Writer side of the process-state ring. Overflow is silent by design;
/// the Health Monitor heals through its data-loss reaction.
pub struct ProcessStateNotifier {
    socket: ShmSocket<PosixProcessRecord>,
    clock: OsClock,
}

impl ProcessStateNotifier {
    /// Create the ring. Called once by the Launch Manager daemon.
    pub fn create() -> Result<Self, ShmError> {
        let socket =
            ShmSocket::create(PROCESS_STATE_SHM_NAME, PROCESS_STATE_RING_CAPACITY, 0o644)?;
        Ok(Self { socket, clock: OsClock })
    }

    /// Publish one transition. Returns false when the ring was full.
    pub fn notify(
        &self,
        process: IdentifierHash,
        state: ProcessState,
        pg_state: IdentifierHash,
    ) -> bool {
        let record = PosixProcessRecord::new(process, state, pg_state, self.clock.now_ns());
        let sent = self.socket.try_send(record);
        trace!(process = %process, state = state.as_str(), sent, "process state published");
        sent
    }
}
