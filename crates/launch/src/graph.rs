// SPDX-License-Identifier: Apache-2.0

//! Per-process-group transition driver.
//!
//! A graph owns one node per configured process and executes one commanded
//! state transition at a time, in two phases: stop every process that
//! leaves the target state (in reverse dependency order), then start every
//! process that enters it (in dependency order). The graph state machine
//! folds concurrent requests through a fixed transition table; disallowed
//! transitions land in `Undefined`, which only a new set-state request can
//! leave.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};
use std::time::Instant;

use hale_core::config::ProcessGroup;
use hale_core::wire::{ControlClientId, ControlCode};
use hale_core::{IdentifierHash, ProcessState};
use hale_shm::ShmError;
use parking_lot::Mutex;
use tracing::debug;

use crate::node::{ProcessInfoNode, Successor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GraphState {
    /// Not running; the process-group state is known.
    Success = 0,
    /// A transition is executing.
    InTransition = 1,
    /// Running but aborted due to an error; the final state is unknown.
    Aborting = 2,
    /// Running but cancelled by a newer request.
    Cancelled = 3,
    /// Not running; the process-group state is unknown.
    Undefined = 4,
}

impl GraphState {
    fn from_u8(v: u8) -> GraphState {
        match v {
            0 => GraphState::Success,
            1 => GraphState::InTransition,
            2 => GraphState::Aborting,
            3 => GraphState::Cancelled,
            _ => GraphState::Undefined,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GraphState::Success => "success",
            GraphState::InTransition => "in-transition",
            GraphState::Aborting => "aborting",
            GraphState::Cancelled => "cancelled",
            GraphState::Undefined => "undefined",
        }
    }
}

/// `STATE_RESULTS[requested][current]` is the state actually entered;
/// disallowed transitions are replaced rather than rejected.
const STATE_RESULTS: [[GraphState; 5]; 5] = {
    use GraphState::*;
    [
        // requested Success, from: Success, InTransition, Aborting, Cancelled, Undefined
        [Success, Success, Undefined, Undefined, Undefined],
        // requested InTransition
        [InTransition, InTransition, Aborting, Cancelled, InTransition],
        // requested Aborting
        [Undefined, Aborting, Aborting, Cancelled, Undefined],
        // requested Cancelled
        [Undefined, Cancelled, Cancelled, Cancelled, Undefined],
        // requested Undefined
        [Undefined, Aborting, Undefined, Undefined, Undefined],
    ]
};

/// Who asked for the transition currently owning the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Origin {
    /// Startup or shutdown path; nobody to answer.
    #[default]
    Internal,
    /// A state-manager channel (slot in the engine's channel registry).
    Channel { slot: usize, client: ControlClientId },
}

/// A response or async event waiting for the control handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingEvent {
    pub code: ControlCode,
    pub execution_error: u32,
    pub origin: Origin,
}

pub struct Graph {
    index: usize,
    group: ProcessGroup,
    nodes: Vec<ProcessInfoNode>,
    state: AtomicU8,
    starting: AtomicBool,
    nodes_to_execute: AtomicU32,
    nodes_in_flight: AtomicI32,
    /// Valid while `state` is `Success`.
    current_state: Mutex<IdentifierHash>,
    requested_state: Mutex<IdentifierHash>,
    pending_state: Mutex<Option<(IdentifierHash, Origin)>>,
    pending_events: Mutex<Vec<PendingEvent>>,
    origin: Mutex<Origin>,
    last_execution_error: AtomicU32,
    is_initial_transition: AtomicBool,
    request_started: Mutex<Option<Instant>>,
}

impl Graph {
    pub fn new(index: usize, group: ProcessGroup) -> Result<Self, ShmError> {
        let mut nodes = group
            .processes
            .iter()
            .enumerate()
            .map(|(i, p)| ProcessInfoNode::new(i as u32, p.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        // Successor lists are fixed by configuration: a dependency of B on
        // A makes B a successor of A under the dependency's trigger.
        for (b, process) in group.processes.iter().enumerate() {
            for dep in &process.dependencies {
                nodes[dep.target_index as usize]
                    .add_successor(Successor { index: b as u32, trigger: dep.trigger });
            }
        }

        Ok(Self {
            index,
            group,
            nodes,
            state: AtomicU8::new(GraphState::Success as u8),
            starting: AtomicBool::new(false),
            nodes_to_execute: AtomicU32::new(0),
            nodes_in_flight: AtomicI32::new(0),
            current_state: Mutex::new(IdentifierHash::default()),
            requested_state: Mutex::new(IdentifierHash::default()),
            pending_state: Mutex::new(None),
            pending_events: Mutex::new(Vec::new()),
            origin: Mutex::new(Origin::Internal),
            last_execution_error: AtomicU32::new(0),
            is_initial_transition: AtomicBool::new(false),
            request_started: Mutex::new(None),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn group(&self) -> &ProcessGroup {
        &self.group
    }

    pub fn name(&self) -> IdentifierHash {
        self.group.name
    }

    pub fn nodes(&self) -> &[ProcessInfoNode] {
        &self.nodes
    }

    pub fn node(&self, index: u32) -> &ProcessInfoNode {
        &self.nodes[index as usize]
    }

    pub fn state(&self) -> GraphState {
        GraphState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Apply the transition table. Returns the state actually entered.
    pub fn request_state(&self, requested: GraphState) -> GraphState {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = STATE_RESULTS[requested as usize][current as usize];
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if next as u8 != current {
                        debug!(
                            group = %self.group.name,
                            from = GraphState::from_u8(current).as_str(),
                            to = next.as_str(),
                            "graph state"
                        );
                    }
                    return next;
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn is_starting(&self) -> bool {
        self.starting.load(Ordering::Acquire)
    }

    pub fn current_state(&self) -> IdentifierHash {
        *self.current_state.lock()
    }

    pub fn set_current_state(&self, state: IdentifierHash) {
        *self.current_state.lock() = state;
    }

    pub fn requested_state(&self) -> IdentifierHash {
        *self.requested_state.lock()
    }

    pub fn set_requested_state(&self, state: IdentifierHash) {
        *self.requested_state.lock() = state;
    }

    /// The pg state to stamp on process-state notifications: the target
    /// while a transition runs, the settled state otherwise.
    pub fn effective_state(&self) -> IdentifierHash {
        match self.state() {
            GraphState::Success => self.current_state(),
            _ => self.requested_state(),
        }
    }

    pub fn set_pending(&self, state: IdentifierHash, origin: Origin) -> Option<(IdentifierHash, Origin)> {
        self.pending_state.lock().replace((state, origin))
    }

    pub fn take_pending(&self) -> Option<(IdentifierHash, Origin)> {
        self.pending_state.lock().take()
    }

    pub fn origin(&self) -> Origin {
        *self.origin.lock()
    }

    pub fn set_origin(&self, origin: Origin) {
        *self.origin.lock() = origin;
    }

    pub fn push_event(&self, event: PendingEvent) {
        self.pending_events.lock().push(event);
    }

    /// Drain the responses/events owed to state managers.
    pub fn take_events(&self) -> Vec<PendingEvent> {
        std::mem::take(&mut *self.pending_events.lock())
    }

    pub fn last_execution_error(&self) -> u32 {
        self.last_execution_error.load(Ordering::Acquire)
    }

    pub fn set_last_execution_error(&self, code: u32) {
        self.last_execution_error.store(code, Ordering::Release);
    }

    pub fn set_initial_transition(&self, initial: bool) {
        self.is_initial_transition.store(initial, Ordering::Release);
    }

    pub fn is_initial_transition(&self) -> bool {
        self.is_initial_transition.load(Ordering::Acquire)
    }

    pub fn mark_request_start(&self) {
        *self.request_started.lock() = Some(Instant::now());
    }

    pub fn request_start_time(&self) -> Option<Instant> {
        *self.request_started.lock()
    }

    // -- transition planning ----------------------------------------------

    fn target_active(&self) -> Vec<u32> {
        self.group
            .state(self.requested_state())
            .map(|s| s.active_processes.clone())
            .unwrap_or_default()
    }

    /// Phase A: mark and count the nodes that must stop. Returns the head
    /// node indices to enqueue.
    pub fn plan_stop_phase(&self) -> Vec<u32> {
        self.starting.store(false, Ordering::Release);
        let active = self.target_active();

        for (i, node) in self.nodes.iter().enumerate() {
            let in_target = active.contains(&(i as u32));
            node.set_in_requested_state(in_target);
            let included = node.state() != ProcessState::Idle && !in_target;
            node.set_included(included);
            node.set_head(false);
            node.reset_restart_counter();
        }

        // A stop-dependency from B to A exists iff B depends on A running:
        // B stops before A, so A waits for every included such B.
        let mut heads = Vec::new();
        let mut to_execute = 0u32;
        for (a, node) in self.nodes.iter().enumerate() {
            if !node.is_included() {
                continue;
            }
            to_execute += 1;
            let blockers = self
                .nodes
                .iter()
                .filter(|b| b.is_included())
                .flat_map(|b| b.config().dependencies.iter())
                .filter(|dep| {
                    dep.target_index as usize == a && dep.trigger == ProcessState::Running
                })
                .count() as u32;
            node.set_dependencies(blockers);
            if blockers == 0 {
                node.set_head(true);
                heads.push(a as u32);
            }
        }

        self.nodes_to_execute.store(to_execute, Ordering::Release);
        heads
    }

    /// Phase B: mark and count the nodes that must start.
    pub fn plan_start_phase(&self) -> Vec<u32> {
        self.starting.store(true, Ordering::Release);

        for node in &self.nodes {
            let included = node.in_requested_state() && node.state() != ProcessState::Running;
            node.set_included(included);
            node.set_head(false);
        }

        let mut heads = Vec::new();
        let mut to_execute = 0u32;
        for (i, node) in self.nodes.iter().enumerate() {
            if !node.is_included() {
                continue;
            }
            to_execute += 1;
            let blockers = node
                .config()
                .dependencies
                .iter()
                .filter(|dep| {
                    let target = &self.nodes[dep.target_index as usize];
                    match dep.trigger {
                        // Satisfied already when the target keeps running
                        // across the transition.
                        ProcessState::Running => target.is_included(),
                        // Only a target started (and self-terminating) in
                        // this very phase still has to signal.
                        ProcessState::Terminated => {
                            target.is_included() && target.config().manager.is_self_terminating
                        }
                        _ => false,
                    }
                })
                .count() as u32;
            node.set_dependencies(blockers);
            if blockers == 0 {
                node.set_head(true);
                heads.push(i as u32);
            }
        }

        self.nodes_to_execute.store(to_execute, Ordering::Release);
        heads
    }

    // -- execution accounting ---------------------------------------------

    /// A node finished its part of the running phase. True when the phase
    /// has drained.
    pub fn node_executed(&self) -> bool {
        self.nodes_to_execute.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn nodes_to_execute(&self) -> u32 {
        self.nodes_to_execute.load(Ordering::Acquire)
    }

    pub fn mark_node_in_flight(&self) {
        self.nodes_in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// A queued job left a worker. True when nothing is in flight anymore.
    pub fn node_left_flight(&self) -> bool {
        self.nodes_in_flight.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn nodes_in_flight(&self) -> i32 {
        self.nodes_in_flight.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
