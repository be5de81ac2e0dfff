// SPDX-License-Identifier: Apache-2.0

//! Per-process unit of work inside a graph.
//!
//! A node owns the last known pid and exit status, the current
//! `ProcessState`, the remaining-dependency counter of the transition in
//! flight, and the successor lists computed once from configuration.
//! Everything mutable is atomic: workers, the reaper and the control
//! handler touch nodes concurrently, and the dependency counters follow the
//! fetch-sub-to-zero rule for scheduling successors.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};

use hale_core::config::OsProcess;
use hale_core::ProcessState;
use hale_shm::{OwnedSemaphore, ShmError};

/// Successor edge: the node at `index` depends on this node reaching the
/// trigger state (`Running` or `Terminated`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Successor {
    pub index: u32,
    pub trigger: ProcessState,
}

pub struct ProcessInfoNode {
    index: u32,
    config: OsProcess,
    state: AtomicU8,
    pid: AtomicI32,
    exit_status: AtomicI32,
    /// Nodes still to finish before this one may execute.
    dependencies: AtomicU32,
    /// Included in the phase currently executing.
    is_included: AtomicBool,
    /// Runs in the requested target state.
    in_requested_state: AtomicBool,
    is_head: AtomicBool,
    restart_counter: AtomicU32,
    /// Nodes that start once this one reports `Running`.
    dependent_on_running: Vec<u32>,
    /// Nodes that start once this one terminates (self-terminating
    /// prerequisites).
    dependent_on_terminating: Vec<u32>,
    /// Posted by the reaper when the process exit has been processed;
    /// workers bound their termination wait on it.
    terminator: OwnedSemaphore,
}

impl ProcessInfoNode {
    pub fn new(index: u32, config: OsProcess) -> Result<Self, ShmError> {
        Ok(Self {
            index,
            config,
            state: AtomicU8::new(ProcessState::Idle as u8),
            pid: AtomicI32::new(0),
            exit_status: AtomicI32::new(0),
            dependencies: AtomicU32::new(0),
            is_included: AtomicBool::new(false),
            in_requested_state: AtomicBool::new(false),
            is_head: AtomicBool::new(false),
            restart_counter: AtomicU32::new(0),
            dependent_on_running: Vec::new(),
            dependent_on_terminating: Vec::new(),
            terminator: OwnedSemaphore::new(0)?,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn config(&self) -> &OsProcess {
        &self.config
    }

    /// Called once by the graph while building successor lists.
    pub fn add_successor(&mut self, successor: Successor) {
        match successor.trigger {
            ProcessState::Running => self.dependent_on_running.push(successor.index),
            ProcessState::Terminated => self.dependent_on_terminating.push(successor.index),
            _ => {}
        }
    }

    pub fn dependent_on_running(&self) -> &[u32] {
        &self.dependent_on_running
    }

    pub fn dependent_on_terminating(&self) -> &[u32] {
        &self.dependent_on_terminating
    }

    pub fn state(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(ProcessState::Idle)
    }

    /// Indivisibly move to `new_state` if that is a valid transition.
    /// Returns false when the transition is not allowed (e.g. requesting
    /// termination of a process that already exited).
    pub fn try_set_state(&self, new_state: ProcessState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let Some(current_state) = ProcessState::from_u8(current) else { return false };
            if !Self::transition_allowed(current_state, new_state) {
                return false;
            }
            match self.state.compare_exchange(
                current,
                new_state as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn transition_allowed(from: ProcessState, to: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (from, to),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Terminating)
                | (Starting, Terminated)
                | (Running, Terminating)
                | (Running, Terminated)
                | (Terminating, Terminated)
                | (Terminated, Idle)
        )
    }

    /// Reset to `Idle` after the termination bookkeeping, ready for the
    /// next transition plan.
    pub fn reset_to_idle(&self) {
        self.state.store(ProcessState::Idle as u8, Ordering::Release);
        self.pid.store(0, Ordering::Release);
    }

    pub fn pid(&self) -> i32 {
        self.pid.load(Ordering::Acquire)
    }

    pub fn set_pid(&self, pid: i32) {
        self.pid.store(pid, Ordering::Release);
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::Acquire)
    }

    pub fn set_exit_status(&self, status: i32) {
        self.exit_status.store(status, Ordering::Release);
    }

    pub fn is_included(&self) -> bool {
        self.is_included.load(Ordering::Acquire)
    }

    pub fn set_included(&self, included: bool) {
        self.is_included.store(included, Ordering::Release);
    }

    pub fn in_requested_state(&self) -> bool {
        self.in_requested_state.load(Ordering::Acquire)
    }

    pub fn set_in_requested_state(&self, requested: bool) {
        self.in_requested_state.store(requested, Ordering::Release);
    }

    pub fn is_head(&self) -> bool {
        self.is_head.load(Ordering::Acquire)
    }

    pub fn set_head(&self, head: bool) {
        self.is_head.store(head, Ordering::Release);
    }

    pub fn set_dependencies(&self, count: u32) {
        self.dependencies.store(count, Ordering::Release);
    }

    /// Decrement the remaining-dependency counter; true exactly when this
    /// call made it reach zero (the caller then schedules the node).
    pub fn dependency_satisfied(&self) -> bool {
        self.dependencies.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn remaining_dependencies(&self) -> u32 {
        self.dependencies.load(Ordering::Acquire)
    }

    pub fn restart_counter(&self) -> u32 {
        self.restart_counter.load(Ordering::Acquire)
    }

    /// Bump the restart counter; true while another attempt is allowed.
    pub fn take_restart_attempt(&self) -> bool {
        let attempts = self.config.manager.restart_attempts;
        self.restart_counter.fetch_add(1, Ordering::AcqRel) < attempts
    }

    pub fn reset_restart_counter(&self) {
        self.restart_counter.store(0, Ordering::Release);
    }

    /// Reaper side: the exit of this node has been fully processed.
    pub fn signal_terminated(&self) {
        let _ = self.terminator.post();
    }

    /// Worker side: bounded wait for the reaper's signal.
    pub fn wait_terminated(&self, timeout: std::time::Duration) -> bool {
        matches!(self.terminator.timed_wait(timeout), Ok(hale_shm::WaitOutcome::Acquired))
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
