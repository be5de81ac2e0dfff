// SPDX-License-Identifier: Apache-2.0

//! Daemon-side mirror of one supervised process.

use hale_core::config::SupervisedProcessConfig;
use hale_core::{IdentifierHash, Nanos, ProcessState, EXECUTION_ERROR_DEFAULT};
use smol_str::SmolStr;

use crate::event::{ProcessIdx, ProcessSnapshot};

/// Last known state of a configured process, updated by the process-state
/// reader, plus the per-pg-state execution-error table.
pub struct ProcessMirror {
    name: SmolStr,
    id: IdentifierHash,
    state: ProcessState,
    pg_state: IdentifierHash,
    timestamp: Nanos,
    pg_states: Vec<IdentifierHash>,
    execution_errors: Vec<u32>,
}

impl ProcessMirror {
    pub fn new(config: &SupervisedProcessConfig) -> Self {
        Self {
            name: config.name.clone(),
            id: config.process_id,
            state: ProcessState::Idle,
            pg_state: IdentifierHash::default(),
            timestamp: 0,
            pg_states: config.pg_states.clone(),
            execution_errors: config.execution_errors.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> IdentifierHash {
        self.id
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn update(&mut self, state: ProcessState, pg_state: IdentifierHash, timestamp: Nanos) {
        self.state = state;
        self.pg_state = pg_state;
        self.timestamp = timestamp;
    }

    /// Update the state only, keeping the last known pg state.
    pub fn set_state(&mut self, state: ProcessState, timestamp: Nanos) {
        self.state = state;
        self.timestamp = timestamp;
    }

    /// Execution error configured for the current pg state; the default
    /// when the process is not configured to run in it.
    pub fn execution_error(&self) -> u32 {
        self.pg_states
            .iter()
            .position(|s| *s == self.pg_state)
            .and_then(|i| self.execution_errors.get(i).copied())
            .unwrap_or(EXECUTION_ERROR_DEFAULT)
    }

    pub fn snapshot(&self, index: ProcessIdx) -> ProcessSnapshot {
        ProcessSnapshot {
            process: index,
            state: self.state,
            pg_state: self.pg_state,
            timestamp: self.timestamp,
            execution_error: self.execution_error(),
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
