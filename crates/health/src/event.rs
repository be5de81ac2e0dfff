// SPDX-License-Identifier: Apache-2.0

//! Event vocabulary flowing through the supervision pipeline.
//!
//! The original design wires supervisions together with observer
//! back-pointers; here every hop is an explicit value routed by the cluster
//! handler over stable indices, so there is no cyclic ownership anywhere.

use hale_core::{ElementaryStatus, IdentifierHash, Nanos, ProcessState, SupervisionKind};

/// Index into the cluster's supervised-process table.
pub type ProcessIdx = usize;

/// Index into the cluster's checkpoint table.
pub type CheckpointIdx = usize;

/// Reference to an elementary supervision: kind plus per-kind index.
pub type ElemRef = (SupervisionKind, usize);

/// A process-state transition as seen by the supervisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub process: ProcessIdx,
    pub state: ProcessState,
    pub pg_state: IdentifierHash,
    pub timestamp: Nanos,
    pub execution_error: u32,
}

/// A checkpoint report as seen by the supervisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointSnapshot {
    pub checkpoint: CheckpointIdx,
    pub id: u32,
    pub timestamp: Nanos,
}

/// One entry of an elementary supervision's time-sorted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateEvent {
    Process(ProcessSnapshot),
    Checkpoint(CheckpointSnapshot),
    Sync(Nanos),
}

impl UpdateEvent {
    pub fn timestamp(&self) -> Nanos {
        match self {
            UpdateEvent::Process(p) => p.timestamp,
            UpdateEvent::Checkpoint(c) => c.timestamp,
            UpdateEvent::Sync(ts) => *ts,
        }
    }
}

/// Status change emitted by an elementary supervision, consumed by the
/// local supervisions observing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub source: ElemRef,
    pub status: ElementaryStatus,
    pub timestamp: Nanos,
    pub execution_error: u32,
}

/// Status change emitted by a local supervision, consumed by the global
/// supervisions observing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalStatusUpdate {
    pub local: usize,
    pub status: ElementaryStatus,
    /// Elementary kind that caused the last change.
    pub kind: SupervisionKind,
    pub timestamp: Nanos,
    pub execution_error: u32,
}
