// SPDX-License-Identifier: Apache-2.0

//! Drains the Launch Manager's process-state ring and updates the process
//! mirrors.
//!
//! A record with a timestamp beyond the sync timestamp is held back and
//! replayed first thing next cycle, so no supervision ever sees an event
//! from outside its window. The platform (EXM) processes never report over
//! the ring; they get one synthetic activation at daemon start.

use std::collections::HashMap;

use hale_core::wire::PosixProcessRecord;
use hale_core::{IdentifierHash, Nanos, ProcessState};
use hale_shm::ShmSocket;
use tracing::{debug, warn};

use crate::event::{ProcessIdx, ProcessSnapshot};
use crate::process::ProcessMirror;

/// Source of process-state records, usually the shm ring.
pub trait ProcessStateSource {
    fn try_next(&self) -> Option<PosixProcessRecord>;
}

impl ProcessStateSource for ShmSocket<PosixProcessRecord> {
    fn try_next(&self) -> Option<PosixProcessRecord> {
        self.try_receive()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl ProcessStateSource for std::sync::Arc<parking_lot::Mutex<Vec<PosixProcessRecord>>> {
    fn try_next(&self) -> Option<PosixProcessRecord> {
        let mut queue = self.lock();
        if queue.is_empty() {
            None
        } else {
            Some(queue.remove(0))
        }
    }
}

pub struct ProcessStateReader<S> {
    source: S,
    /// A record read past the sync timestamp, replayed next cycle.
    pending: Option<ProcessSnapshot>,
}

impl<S: ProcessStateSource> ProcessStateReader<S> {
    pub fn new(source: S) -> Self {
        Self { source, pending: None }
    }

    /// Update mirrors from the ring and append one snapshot per consumed
    /// record to `out`, stopping at the first record beyond `sync_ts`.
    pub fn distribute(
        &mut self,
        sync_ts: Nanos,
        mirrors: &mut [ProcessMirror],
        index_of: &HashMap<IdentifierHash, ProcessIdx>,
        out: &mut Vec<ProcessSnapshot>,
    ) {
        if let Some(snapshot) = self.pending.take() {
            out.push(snapshot);
        }

        while let Some(record) = self.source.try_next() {
            let Some(state) = record.state() else {
                warn!(id = %record.process_id(), "corrupt process-state record dropped");
                continue;
            };
            let Some(&index) = index_of.get(&record.process_id()) else {
                debug!(id = %record.process_id(), "process-state record for unknown process");
                continue;
            };

            let timestamp = record.timestamp_ns();
            mirrors[index].update(state, record.pg_state(), timestamp);
            let snapshot = mirrors[index].snapshot(index);

            if timestamp <= sync_ts {
                out.push(snapshot);
            } else {
                // Belongs to the next cycle.
                self.pending = Some(snapshot);
                break;
            }
        }
    }

    /// Synthesize the activation of the platform processes at daemon start.
    pub fn distribute_platform_activation(
        &mut self,
        timestamp: Nanos,
        mirrors: &mut [ProcessMirror],
        platform: &[ProcessIdx],
        out: &mut Vec<ProcessSnapshot>,
    ) {
        for &index in platform {
            mirrors[index].set_state(ProcessState::Running, timestamp);
            out.push(mirrors[index].snapshot(index));
        }
    }
}

#[cfg(test)]
#[path = "reader_tests.rs"]
mod tests;
