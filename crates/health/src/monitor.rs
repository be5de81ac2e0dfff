// SPDX-License-Identifier: Apache-2.0

//! Daemon side of one application's checkpoint ring.
//!
//! Drains records up to the sync timestamp each tick and fans them out;
//! records newer than the sync timestamp stay in the ring for the next
//! cycle, which is what lets every supervision reason only about events
//! inside the current window. Ring overflow (or a failing pop, which means
//! the ring state is corrupt) becomes a data-loss event and parks the
//! interface in `InactiveOverflow` until the process goes away; a restart
//! of the process re-announces the data loss.

use hale_core::wire::CheckpointRecord;
use hale_core::{Nanos, ProcessState};
use hale_shm::ShmSocket;
use smol_str::SmolStr;
use tracing::warn;

use crate::event::{ProcessIdx, ProcessSnapshot};

/// Daemon-side view of a checkpoint ring.
pub trait CheckpointDrain {
    fn peek(&self) -> Option<CheckpointRecord>;
    fn pop(&self) -> bool;
    fn overflow(&self) -> bool;
}

impl CheckpointDrain for ShmSocket<CheckpointRecord> {
    fn peek(&self) -> Option<CheckpointRecord> {
        self.try_peek(|rec| *rec)
    }

    fn pop(&self) -> bool {
        self.try_pop()
    }

    fn overflow(&self) -> bool {
        ShmSocket::overflow(self, true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Inactive,
    Active,
    /// Data was lost; stay inactive until the process deactivates.
    InactiveOverflow,
}

/// What a tick of the monitor produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEvent {
    Checkpoint { id: u32, timestamp: Nanos },
    DataLoss,
}

pub struct MonitorInterface<S> {
    name: SmolStr,
    source: S,
    process: ProcessIdx,
    state: MonitorState,
    activate_requested: bool,
    deactivate_requested: bool,
    restarted: bool,
}

impl<S: CheckpointDrain> MonitorInterface<S> {
    pub fn new(name: SmolStr, process: ProcessIdx, source: S) -> Self {
        Self {
            name,
            source,
            process,
            state: MonitorState::Inactive,
            activate_requested: false,
            deactivate_requested: false,
            restarted: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process(&self) -> ProcessIdx {
        self.process
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Track the owning process. Activation applies immediately on the next
    /// tick; deactivation is deferred to the tick boundary so checkpoints
    /// reported just before the exit still count.
    pub fn on_process_state(&mut self, snapshot: &ProcessSnapshot) {
        match snapshot.state {
            ProcessState::Starting | ProcessState::Running => {
                if self.deactivate_requested {
                    self.restarted = true;
                }
                self.activate_requested = true;
                self.deactivate_requested = false;
            }
            ProcessState::Terminated => {
                self.deactivate_requested = true;
            }
            _ => {}
        }
    }

    /// Drain records with `timestamp <= sync_ts` into `out`.
    pub fn check_for_new_data(&mut self, sync_ts: Nanos, out: &mut Vec<MonitorEvent>) {
        if self.activate_requested && self.state == MonitorState::Inactive {
            self.state = MonitorState::Active;
        }

        match self.state {
            MonitorState::Active => {
                if self.source.overflow() {
                    self.handle_overflow(out);
                    return;
                }
                if !self.drain(sync_ts, out) {
                    self.handle_overflow(out);
                    return;
                }
                if self.deactivate_requested {
                    self.state = MonitorState::Inactive;
                    self.activate_requested = false;
                    self.deactivate_requested = false;
                }
            }
            MonitorState::InactiveOverflow => {
                if self.restarted {
                    // The ring is still broken after the restart; observers
                    // must see the loss again.
                    self.restarted = false;
                    out.push(MonitorEvent::DataLoss);
                }
            }
            MonitorState::Inactive => {}
        }
    }

    fn drain(&mut self, sync_ts: Nanos, out: &mut Vec<MonitorEvent>) -> bool {
        while let Some(record) = self.source.peek() {
            if record.timestamp > sync_ts {
                // Belongs to the next cycle.
                return true;
            }
            out.push(MonitorEvent::Checkpoint {
                id: record.checkpoint_id,
                timestamp: record.timestamp,
            });
            if !self.source.pop() {
                // Peeked but cannot pop: the ring state is corrupt.
                return false;
            }
        }
        true
    }

    fn handle_overflow(&mut self, out: &mut Vec<MonitorEvent>) {
        warn!(interface = %self.name, "checkpoint ring data loss");
        out.push(MonitorEvent::DataLoss);
        self.state = MonitorState::InactiveOverflow;
    }
}

/// In-memory checkpoint source for tests.
#[cfg(any(test, feature = "test-support"))]
pub struct FakeCheckpointSource {
    queue: std::sync::Arc<parking_lot::Mutex<std::collections::VecDeque<CheckpointRecord>>>,
    overflowed: std::sync::Arc<parking_lot::Mutex<bool>>,
    fail_pop: std::sync::Arc<parking_lot::Mutex<bool>>,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for FakeCheckpointSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl FakeCheckpointSource {
    pub fn new() -> Self {
        Self {
            queue: Default::default(),
            overflowed: Default::default(),
            fail_pop: Default::default(),
        }
    }

    /// A second handle feeding the same queue.
    pub fn writer(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            overflowed: self.overflowed.clone(),
            fail_pop: self.fail_pop.clone(),
        }
    }

    pub fn push(&self, timestamp: Nanos, id: u32) {
        self.queue.lock().push_back(CheckpointRecord::new(timestamp, id));
    }

    pub fn set_overflow(&self) {
        *self.overflowed.lock() = true;
    }

    pub fn set_fail_pop(&self) {
        *self.fail_pop.lock() = true;
    }
}

#[cfg(any(test, feature = "test-support"))]
impl CheckpointDrain for FakeCheckpointSource {
    fn peek(&self) -> Option<CheckpointRecord> {
        self.queue.lock().front().copied()
    }

    fn pop(&self) -> bool {
        if *self.fail_pop.lock() {
            return false;
        }
        self.queue.lock().pop_front().is_some()
    }

    fn overflow(&self) -> bool {
        std::mem::take(&mut *self.overflowed.lock())
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
