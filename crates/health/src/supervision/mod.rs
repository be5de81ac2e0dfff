// SPDX-License-Identifier: Apache-2.0

//! The supervision state machines.
//!
//! Alive, Deadline and Logical share a skeleton: observer callbacks deposit
//! time-stamped events into the sorting buffer, `evaluate(sync_ts)` appends
//! the synthetic sync event and walks everything oldest-first. Status
//! switches are pushed as [`StatusUpdate`]s for the local supervisions;
//! locals push [`LocalStatusUpdate`]s for the globals.

mod alive;
mod deadline;
mod global;
mod local;
mod logical;

pub use alive::AliveSupervision;
pub use deadline::DeadlineSupervision;
pub use global::{GlobalEvent, GlobalSupervision};
pub use local::LocalSupervision;
pub use logical::LogicalSupervision;

use std::collections::HashMap;

use hale_core::{ElementaryStatus, Nanos, EXECUTION_ERROR_DEFAULT};
use smol_str::SmolStr;

use crate::event::{ElemRef, ProcessIdx, StatusUpdate, UpdateEvent};
use crate::tracker::{ChangeKind, ProcessStateTracker};

/// What a buffered event means to an elementary supervision once the
/// tracker has folded it in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    NoChange,
    Activation,
    Deactivation,
    Checkpoint,
    Sync,
    RecoveredFromCrash,
}

/// State shared by the three elementary supervisions: identity, activation
/// tracking and the per-process execution errors observed while draining.
pub(crate) struct ElementaryCommon {
    pub name: SmolStr,
    pub source: ElemRef,
    pub tracker: ProcessStateTracker,
    exec_errors: HashMap<ProcessIdx, u32>,
    pub last_exec_error: u32,
    pub event_timestamp: Nanos,
    pub last_sync: Nanos,
}

impl ElementaryCommon {
    pub fn new(name: SmolStr, source: ElemRef, tracker: ProcessStateTracker) -> Self {
        Self {
            name,
            source,
            tracker,
            exec_errors: HashMap::new(),
            last_exec_error: EXECUTION_ERROR_DEFAULT,
            event_timestamp: 0,
            last_sync: 0,
        }
    }

    /// Classify a sorted event, folding process updates into the tracker
    /// and remembering the execution error seen for each process.
    pub fn classify(&mut self, event: &UpdateEvent) -> EventKind {
        match event {
            UpdateEvent::Process(snapshot) => {
                let change = self.tracker.apply(snapshot);
                self.exec_errors.insert(snapshot.process, snapshot.execution_error);
                match change.kind {
                    ChangeKind::Activation => EventKind::Activation,
                    ChangeKind::Deactivation => EventKind::Deactivation,
                    ChangeKind::RecoveredFromCrash => EventKind::RecoveredFromCrash,
                    ChangeKind::NoChange => EventKind::NoChange,
                }
            }
            UpdateEvent::Checkpoint(_) => EventKind::Checkpoint,
            UpdateEvent::Sync(_) => EventKind::Sync,
        }
    }

    /// The execution error last observed for `process`.
    pub fn error_for(&self, process: ProcessIdx) -> u32 {
        self.exec_errors.get(&process).copied().unwrap_or(EXECUTION_ERROR_DEFAULT)
    }

    /// Emit one status update for the observing local supervisions.
    pub fn emit(&self, status: ElementaryStatus, out: &mut Vec<StatusUpdate>) {
        out.push(StatusUpdate {
            source: self.source,
            status,
            timestamp: self.event_timestamp,
            execution_error: self.last_exec_error,
        });
    }
}
