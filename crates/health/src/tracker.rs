// SPDX-License-Identifier: Apache-2.0

//! Tracks which of a supervision's processes are currently active.
//!
//! A process counts as active when it has reached the configured activation
//! marker (`Starting` by default, `Running` where a supervision demands it)
//! while its process group is in one of the supervision's configured
//! states. A `Terminated` that was not preceded by a deactivation is a
//! crash; a later full activation then reports `RecoveredFromCrash` instead
//! of a plain `Activation`.

use hale_core::{IdentifierHash, Nanos, ProcessState};

use crate::event::{ProcessIdx, ProcessSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Deactivated,
    Activated,
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    NoChange,
    /// All processes are now active, at least one was not.
    Activation,
    /// Not all active anymore, all were, at least one deactivated cleanly.
    Deactivation,
    /// Activation, and the previous cycle saw a crash.
    RecoveredFromCrash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessChange {
    pub timestamp: Nanos,
    pub kind: ChangeKind,
}

pub struct ProcessStateTracker {
    active_pg_states: Vec<IdentifierHash>,
    watched: Vec<ProcessIdx>,
    states: Vec<SlotState>,
    before: Vec<SlotState>,
    active_marker: ProcessState,
}

impl ProcessStateTracker {
    pub fn new(active_pg_states: Vec<IdentifierHash>, watched: Vec<ProcessIdx>) -> Self {
        let n = watched.len();
        Self {
            active_pg_states,
            watched,
            states: vec![SlotState::Deactivated; n],
            before: vec![SlotState::Deactivated; n],
            active_marker: ProcessState::Starting,
        }
    }

    /// Consider processes active only from the given state onward.
    pub fn set_active_marker(&mut self, marker: ProcessState) {
        self.active_marker = marker;
    }

    /// Whether a process update with this state matters for activation
    /// tracking at all.
    pub fn is_relevant(&self, state: ProcessState) -> bool {
        match self.active_marker {
            ProcessState::Running => matches!(
                state,
                ProcessState::Running | ProcessState::Terminating | ProcessState::Terminated
            ),
            _ => matches!(
                state,
                ProcessState::Starting
                    | ProcessState::Running
                    | ProcessState::Terminating
                    | ProcessState::Terminated
            ),
        }
    }

    /// Force every slot active. Used after data loss so the supervision can
    /// heal through a regular deactivation.
    pub fn set_all_active(&mut self) {
        self.states.fill(SlotState::Activated);
        self.before.fill(SlotState::Activated);
    }

    pub fn all_active(&self) -> bool {
        !self.before.is_empty() && self.before.iter().all(|s| *s == SlotState::Activated)
    }

    /// Fold one process update in and report the aggregate change.
    pub fn apply(&mut self, snapshot: &ProcessSnapshot) -> ProcessChange {
        self.update_slot(snapshot);
        let change = self.analyze(snapshot);
        self.before.copy_from_slice(&self.states);
        change
    }

    fn is_active_state(&self, state: ProcessState) -> bool {
        match self.active_marker {
            ProcessState::Running => state == ProcessState::Running,
            _ => matches!(state, ProcessState::Starting | ProcessState::Running),
        }
    }

    fn in_active_pg_state(&self, pg_state: IdentifierHash) -> bool {
        self.active_pg_states.contains(&pg_state)
    }

    fn update_slot(&mut self, snapshot: &ProcessSnapshot) {
        let Some(index) = self.watched.iter().position(|p| *p == snapshot.process) else {
            return;
        };
        let active = self.is_active_state(snapshot.state);
        if active && self.in_active_pg_state(snapshot.pg_state) {
            self.states[index] = SlotState::Activated;
        } else if active || snapshot.state == ProcessState::Terminating {
            // Active in a foreign pg state, or a clean termination request.
            self.states[index] = SlotState::Deactivated;
        } else if snapshot.state == ProcessState::Terminated
            && self.states[index] != SlotState::Deactivated
        {
            // Exit without a preceding termination request.
            self.states[index] = SlotState::Crashed;
        }
    }

    fn analyze(&self, snapshot: &ProcessSnapshot) -> ProcessChange {
        let all = |slots: &[SlotState], value| !slots.is_empty() && slots.iter().all(|s| *s == value);
        let any = |slots: &[SlotState], value| slots.iter().any(|s| *s == value);

        let are_active = all(&self.states, SlotState::Activated);
        let were_active = all(&self.before, SlotState::Activated);

        if are_active && !were_active {
            let kind = if any(&self.before, SlotState::Crashed) {
                ChangeKind::RecoveredFromCrash
            } else {
                ChangeKind::Activation
            };
            ProcessChange { timestamp: snapshot.timestamp, kind }
        } else if !are_active && were_active && any(&self.states, SlotState::Deactivated) {
            ProcessChange { timestamp: snapshot.timestamp, kind: ChangeKind::Deactivation }
        } else {
            ProcessChange { timestamp: 0, kind: ChangeKind::NoChange }
        }
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
