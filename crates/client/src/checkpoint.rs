// SPDX-License-Identifier: Apache-2.0

//! Checkpoint reporting onto the application's shared-memory ring.

use hale_core::limits::CHECKPOINT_SHM_PREFIX;
use hale_core::wire::CheckpointRecord;
use hale_core::{MonotonicClock, OsClock};
use hale_shm::ShmSocket;

use crate::error::ClientError;

/// Writer for one monitor interface. The ring is lossy: a full ring drops
/// the report and the Health Monitor detects the loss through the overflow
/// flag.
pub struct CheckpointReporter {
    socket: ShmSocket<CheckpointRecord>,
    clock: OsClock,
}

impl CheckpointReporter {
    /// Connect to the interface the daemon created for this application.
    pub fn connect(interface_name: &str) -> Result<Self, ClientError> {
        let shm_name = format!("{CHECKPOINT_SHM_PREFIX}{interface_name}");
        let socket = ShmSocket::connect(&shm_name).map_err(|source| {
            ClientError::CheckpointInterface { name: interface_name.to_string(), source }
        })?;
        Ok(Self { socket, clock: OsClock })
    }

    /// Report one checkpoint. Returns false when the ring was full.
    pub fn report(&self, checkpoint_id: u32) -> bool {
        self.socket.try_send(CheckpointRecord::new(self.clock.now_ns(), checkpoint_id))
    }
}
