// SPDX-License-Identifier: Apache-2.0

//! The process-group manager: owns every graph, the bounded job queue, the
//! worker pool and the reaper, and drives transitions end to end.
//!
//! Per-group transitions are serialised by the graph state machine: a
//! request arriving while a transition runs is recorded as pending, the
//! running transition is cancelled (it still executes to quiescence, no
//! force-terminations), and the pending state is taken up afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use hale_core::limits::{MAX_QUEUE_DELAY, MAX_SIGKILL_DELAY, WORKER_THREADS};
use hale_core::wire::ControlCode;
use hale_core::{CommsType, IdentifierHash, ProcessState};
use hale_shm::{HandlerNudge, ShmError, SyncBlock};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::graph::{Graph, GraphState, Origin, PendingEvent};
use crate::notifier::ProcessStateNotifier;
use crate::osal::{ProcessOps, StartWait};
use crate::queue::{Job, JobQueue};

/// Wakes the control handler; graphs post completions through it and the
/// recovery/state-manager clients post requests.
pub trait Nudge: Send + Sync + 'static {
    fn nudge(&self);
}

impl Nudge for HandlerNudge {
    fn nudge(&self) {
        let _ = self.post();
    }
}

/// For engines running without the control daemon side (tests, shutdown).
#[derive(Default)]
pub struct NoopNudge;

impl Nudge for NoopNudge {
    fn nudge(&self) {}
}

/// Immediate outcome of a set-state request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetStateOutcome {
    /// Unknown process group.
    InvalidGroup,
    /// Unknown process-group state.
    InvalidState,
    /// The group already is in the requested state; no work scheduled.
    AlreadyInState,
    /// A transition to the requested state is already running.
    TransitionToSameState,
    /// Transition started; the response follows on completion.
    Started,
    /// An in-flight transition was cancelled; the request runs afterwards.
    Pending,
    /// The graph could not enter the transition state.
    Rejected,
}

/// A registered state-manager control channel.
pub struct SmChannel {
    pub graph: usize,
    pub node: u32,
    pub pid: i32,
    pub block: Arc<SyncBlock>,
}

pub struct Engine<O: ProcessOps> {
    graphs: Vec<Arc<Graph>>,
    graph_by_name: HashMap<IdentifierHash, usize>,
    queue: JobQueue,
    pid_map: RwLock<HashMap<i32, (usize, u32)>>,
    ops: O,
    notifier: Option<ProcessStateNotifier>,
    nudge: Arc<dyn Nudge>,
    sm_channels: RwLock<Vec<Option<SmChannel>>>,
    initial_result: AtomicU32,
    shutting_down: AtomicBool,
}

impl<O: ProcessOps> Engine<O> {
    pub fn new(
        groups: Vec<hale_core::ProcessGroup>,
        ops: O,
        notifier: Option<ProcessStateNotifier>,
        nudge: Arc<dyn Nudge>,
    ) -> Result<Arc<Self>, ShmError> {
        let mut graphs = Vec::with_capacity(groups.len());
        let mut graph_by_name = HashMap::new();
        for (i, group) in groups.into_iter().enumerate() {
            graph_by_name.insert(group.name, i);
            graphs.push(Arc::new(Graph::new(i, group)?));
        }
        Ok(Arc::new(Self {
            graphs,
            graph_by_name,
            queue: JobQueue::new(WORKER_THREADS * 4),
            pid_map: RwLock::new(HashMap::new()),
            ops,
            notifier,
            nudge,
            sm_channels: RwLock::new(Vec::new()),
            initial_result: AtomicU32::new(ControlCode::InitialMachineStateNotSet as u32),
            shutting_down: AtomicBool::new(false),
        }))
    }

    pub fn graphs(&self) -> &[Arc<Graph>] {
        &self.graphs
    }

    pub fn graph_index(&self, group: IdentifierHash) -> Option<usize> {
        self.graph_by_name.get(&group).copied()
    }

    pub fn graph(&self, index: usize) -> &Arc<Graph> {
        &self.graphs[index]
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn initial_result(&self) -> ControlCode {
        ControlCode::from_u32(self.initial_result.load(Ordering::Acquire))
            .unwrap_or(ControlCode::InitialMachineStateNotSet)
    }

    // -- threads ----------------------------------------------------------

    pub fn spawn_workers(self: &Arc<Self>, count: usize) -> std::io::Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(count);
        for i in 0..count {
            let engine = Arc::clone(self);
            let handle = std::thread::Builder::new()
                .name(format!("hale-worker-{i}"))
                .spawn(move || {
                    while engine.queue.is_running() {
                        if let Some(job) = engine.queue.get(MAX_QUEUE_DELAY) {
                            engine.execute(job);
                        }
                    }
                })?;
            handles.push(handle);
        }
        Ok(handles)
    }

    pub fn spawn_reaper(self: &Arc<Self>) -> std::io::Result<JoinHandle<()>> {
        let engine = Arc::clone(self);
        std::thread::Builder::new().name("hale-reaper".to_string()).spawn(move || {
            while !engine.shutting_down.load(Ordering::Acquire) {
                if let Some((pid, status)) = engine.ops.wait_any() {
                    engine.handle_exit(pid, status);
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.queue.stop();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    // -- control entry points ---------------------------------------------

    /// Drive `group` towards `state`. The deferred outcomes (`Started`,
    /// `Pending`) answer through the graph's pending events.
    pub fn set_state(
        &self,
        group: IdentifierHash,
        state: IdentifierHash,
        origin: Origin,
    ) -> SetStateOutcome {
        let Some(g) = self.graph_index(group) else { return SetStateOutcome::InvalidGroup };
        let graph = Arc::clone(&self.graphs[g]);
        if graph.group().state(state).is_none() && state != graph.group().off_state {
            return SetStateOutcome::InvalidState;
        }

        match graph.state() {
            GraphState::Success if graph.current_state() == state => {
                SetStateOutcome::AlreadyInState
            }
            GraphState::InTransition if graph.requested_state() == state => {
                SetStateOutcome::TransitionToSameState
            }
            GraphState::InTransition | GraphState::Aborting | GraphState::Cancelled => {
                // A pending request that gets superseded in turn is
                // answered with the cancellation code as well.
                if let Some((_, previous)) = graph.set_pending(state, origin) {
                    graph.push_event(PendingEvent {
                        code: ControlCode::SetStateCancelled,
                        execution_error: 0,
                        origin: previous,
                    });
                }
                self.cancel_graph(g);
                SetStateOutcome::Pending
            }
            _ => {
                if graph.request_state(GraphState::InTransition) != GraphState::InTransition {
                    return SetStateOutcome::Rejected;
                }
                self.begin_transition(g, state, origin);
                SetStateOutcome::Started
            }
        }
    }

    /// The initial machine-state transition at daemon start.
    pub fn start_initial_transition(
        &self,
        group: IdentifierHash,
        state: IdentifierHash,
    ) -> SetStateOutcome {
        if let Some(g) = self.graph_index(group) {
            self.graphs[g].set_initial_transition(true);
        }
        self.set_state(group, state, Origin::Internal)
    }

    /// Shutdown path: every group towards its off state. Works even for
    /// groups without a configured `Off` state (stop everything).
    pub fn start_off_transitions(&self) {
        for graph in &self.graphs {
            let off = graph.group().off_state;
            let _ = self.set_state(graph.group().name, off, Origin::Internal);
        }
    }

    pub fn validate_state(&self, group: IdentifierHash, state: IdentifierHash) -> bool {
        self.graph_index(group)
            .map(|g| self.graphs[g].group().state(state).is_some())
            .unwrap_or(false)
    }

    /// Execution-error query: `None` for an unknown group, `Some(None)`
    /// when the group is in a defined state, `Some(Some(code))` otherwise.
    pub fn execution_error(&self, group: IdentifierHash) -> Option<Option<u32>> {
        let g = self.graph_index(group)?;
        let graph = &self.graphs[g];
        match graph.state() {
            GraphState::Undefined => Some(Some(graph.last_execution_error())),
            _ => Some(None),
        }
    }

    // -- channel registry -------------------------------------------------

    pub(crate) fn register_channel(&self, graph: usize, node: u32, pid: i32, block: Arc<SyncBlock>) {
        let mut channels = self.sm_channels.write();
        let entry = SmChannel { graph, node, pid, block };
        if let Some(slot) = channels.iter_mut().find(|s| s.is_none()) {
            *slot = Some(entry);
        } else {
            channels.push(Some(entry));
        }
    }

    fn unregister_channel(&self, pid: i32) {
        let mut channels = self.sm_channels.write();
        for slot in channels.iter_mut() {
            if slot.as_ref().map(|c| c.pid) == Some(pid) {
                *slot = None;
            }
        }
    }

    /// Snapshot of the live state-manager channels for the handler scan.
    pub fn channels(&self) -> Vec<(usize, Arc<SyncBlock>)> {
        self.sm_channels
            .read()
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|c| (i, Arc::clone(&c.block))))
            .collect()
    }

    pub fn channel_block(&self, slot: usize) -> Option<Arc<SyncBlock>> {
        self.sm_channels.read().get(slot).and_then(|s| s.as_ref().map(|c| Arc::clone(&c.block)))
    }

    // -- transition machinery ---------------------------------------------

    fn begin_transition(&self, g: usize, target: IdentifierHash, origin: Origin) {
        let graph = Arc::clone(&self.graphs[g]);
        graph.set_requested_state(target);
        graph.set_origin(origin);
        graph.mark_request_start();
        info!(group = %graph.name(), state = %target, "process group transition started");

        let heads = graph.plan_stop_phase();
        if graph.nodes_to_execute() == 0 {
            self.enter_start_phase(&graph);
        } else {
            for n in heads {
                self.enqueue_node(&graph, n);
            }
        }
    }

    fn enter_start_phase(&self, graph: &Arc<Graph>) {
        let heads = graph.plan_start_phase();
        if graph.nodes_to_execute() == 0 {
            self.complete_transition(graph);
            return;
        }
        for n in heads {
            self.enqueue_node(graph, n);
        }
    }

    fn enqueue_node(&self, graph: &Arc<Graph>, n: u32) {
        graph.mark_node_in_flight();
        if !self.queue.add(Job { graph: graph.index(), node: n }) {
            warn!(group = %graph.name(), node = n, "job queue rejected node");
            graph.node_left_flight();
            let code = graph.node(n).config().manager.execution_error_code;
            self.abort_graph(graph.index(), code, ControlCode::SetStateFailed);
        }
    }

    fn cancel_graph(&self, g: usize) {
        let graph = &self.graphs[g];
        if graph.request_state(GraphState::Cancelled) == GraphState::Cancelled {
            // The superseded requester learns about the cancellation now;
            // the graph itself runs on to quiescence.
            graph.push_event(PendingEvent {
                code: ControlCode::SetStateCancelled,
                execution_error: 0,
                origin: graph.origin(),
            });
            self.nudge.nudge();
        }
        self.finalize_if_quiescent(g);
    }

    fn abort_graph(&self, g: usize, code: u32, reason: ControlCode) {
        let graph = &self.graphs[g];
        graph.set_last_execution_error(code);
        match graph.request_state(GraphState::Aborting) {
            GraphState::Aborting => {
                // In-flight jobs drain as no-ops; the set-state response
                // comes when the graph is quiescent.
                if reason != ControlCode::SetStateFailed {
                    graph.push_event(PendingEvent {
                        code: reason,
                        execution_error: code,
                        origin: graph.origin(),
                    });
                }
                self.nudge.nudge();
                self.finalize_if_quiescent(g);
            }
            GraphState::Undefined => {
                // The graph was not running: this is an asynchronous
                // unexpected-termination report.
                graph.push_event(PendingEvent {
                    code: reason,
                    execution_error: code,
                    origin: graph.origin(),
                });
                self.nudge.nudge();
            }
            _ => {}
        }
    }

    /// An aborting graph with nothing in flight settles in `Undefined`.
    fn finalize_if_quiescent(&self, g: usize) {
        let graph = &self.graphs[g];
        if graph.nodes_in_flight() != 0 {
            return;
        }
        if graph.state() != GraphState::Aborting {
            return;
        }
        if graph.request_state(GraphState::Undefined) == GraphState::Undefined {
            graph.push_event(PendingEvent {
                code: ControlCode::SetStateFailed,
                execution_error: graph.last_execution_error(),
                origin: graph.origin(),
            });
            if graph.is_initial_transition() {
                self.initial_result
                    .store(ControlCode::InitialMachineStateFailed as u32, Ordering::Release);
                graph.set_initial_transition(false);
            }
            self.nudge.nudge();
            self.start_pending(g);
        }
    }

    fn complete_transition(&self, graph: &Arc<Graph>) {
        match graph.request_state(GraphState::Success) {
            GraphState::Success => {
                graph.set_current_state(graph.requested_state());
                info!(group = %graph.name(), state = %graph.current_state(), "process group transition complete");
                graph.push_event(PendingEvent {
                    code: ControlCode::SetStateSuccess,
                    execution_error: 0,
                    origin: graph.origin(),
                });
                if graph.is_initial_transition() {
                    self.initial_result
                        .store(ControlCode::InitialMachineStateSuccess as u32, Ordering::Release);
                    graph.set_initial_transition(false);
                }
                self.nudge.nudge();
            }
            GraphState::Undefined => {
                // A cancelled transition ran to quiescence.
                if graph.is_initial_transition() {
                    self.initial_result
                        .store(ControlCode::InitialMachineStateFailed as u32, Ordering::Release);
                    graph.set_initial_transition(false);
                }
                self.nudge.nudge();
                self.start_pending(graph.index());
            }
            _ => {}
        }
    }

    fn start_pending(&self, g: usize) {
        let graph = Arc::clone(&self.graphs[g]);
        if let Some((state, origin)) = graph.take_pending() {
            if graph.request_state(GraphState::InTransition) == GraphState::InTransition {
                self.begin_transition(g, state, origin);
            }
        }
    }

    // -- worker actions ---------------------------------------------------

    fn execute(&self, job: Job) {
        let graph = Arc::clone(&self.graphs[job.graph]);
        match graph.state() {
            GraphState::InTransition | GraphState::Cancelled => {
                if graph.is_starting() {
                    self.start_node(&graph, job.node);
                } else {
                    self.stop_node(&graph, job.node);
                }
            }
            _ => {
                // Aborted while queued: the job drains without an action.
                debug!(group = %graph.name(), node = job.node, "job dropped, graph not running");
            }
        }
        if graph.node_left_flight() {
            self.finalize_if_quiescent(job.graph);
        }
    }

    fn start_node(&self, graph: &Arc<Graph>, n: u32) {
        let node = graph.node(n);
        if !node.try_set_state(ProcessState::Starting) {
            // Already beyond Idle (e.g. restart race): account and move on.
            self.phase_step_done(graph);
            return;
        }
        self.publish(graph, n, ProcessState::Starting);

        let pid = match self.ops.start(&node.config().startup) {
            Ok(pid) => pid,
            Err(err) => {
                warn!(group = %graph.name(), process = %node.config().process_id, %err, "spawn failed");
                let _ = node.try_set_state(ProcessState::Terminated);
                node.reset_to_idle();
                self.abort_graph(
                    graph.index(),
                    node.config().manager.execution_error_code,
                    ControlCode::SetStateFailed,
                );
                return;
            }
        };

        node.set_pid(pid);
        self.pid_map.write().insert(pid, (graph.index(), n));
        if node.config().startup.comms_type == CommsType::ControlClient {
            if let Some(block) = self.ops.sync_block(pid) {
                self.register_channel(graph.index(), n, pid, block);
            }
        }

        match self.ops.await_running(pid, &node.config().startup, node.config().manager.startup_timeout)
        {
            StartWait::Running => {
                if node.try_set_state(ProcessState::Running) {
                    self.publish(graph, n, ProcessState::Running);
                    node.reset_restart_counter();
                    self.walk_running_successors(graph, n);
                    self.phase_step_done(graph);
                }
                // Otherwise the process already died; the reaper owns the
                // bookkeeping.
            }
            StartWait::Timeout => {
                if node.state() != ProcessState::Starting {
                    // The reaper already processed an exit of this node.
                    return;
                }
                warn!(group = %graph.name(), process = %node.config().process_id, "no Running report within the startup timeout");
                if node.try_set_state(ProcessState::Terminating) {
                    self.publish(graph, n, ProcessState::Terminating);
                }
                self.ops.force_termination(pid);
                self.abort_graph(
                    graph.index(),
                    node.config().manager.execution_error_code,
                    ControlCode::SetStateFailed,
                );
            }
        }
    }

    fn stop_node(&self, graph: &Arc<Graph>, n: u32) {
        let node = graph.node(n);
        let pid = node.pid();
        if !node.try_set_state(ProcessState::Terminating) {
            // Already exited; the reaper has done or will do the
            // accounting.
            return;
        }
        self.publish(graph, n, ProcessState::Terminating);
        self.ops.request_termination(pid);

        if !node.wait_terminated(node.config().manager.termination_timeout) {
            warn!(group = %graph.name(), process = %node.config().process_id, "termination timeout, sending kill");
            self.ops.force_termination(pid);
            if !node.wait_terminated(MAX_SIGKILL_DELAY) {
                warn!(group = %graph.name(), process = %node.config().process_id, "process survived the kill grace period");
            }
        }
    }

    fn phase_step_done(&self, graph: &Arc<Graph>) {
        if graph.node_executed() {
            if graph.is_starting() {
                self.complete_transition(graph);
            } else {
                self.enter_start_phase(graph);
            }
        }
    }

    fn walk_running_successors(&self, graph: &Arc<Graph>, n: u32) {
        if !graph.is_starting() {
            return;
        }
        for &s in graph.node(n).dependent_on_running() {
            let successor = graph.node(s);
            if successor.is_included() && successor.dependency_satisfied() {
                self.enqueue_node(graph, s);
            }
        }
    }

    /// Start phase: a self-terminating prerequisite ended; release the
    /// nodes waiting on its termination.
    fn walk_termination_successors(&self, graph: &Arc<Graph>, n: u32) {
        for &s in graph.node(n).dependent_on_terminating() {
            let successor = graph.node(s);
            if successor.is_included() && successor.dependency_satisfied() {
                self.enqueue_node(graph, s);
            }
        }
    }

    /// Stop phase: this node ended, so the nodes it depended on (which
    /// stop after it) lose one blocker each.
    fn walk_stop_successors(&self, graph: &Arc<Graph>, n: u32) {
        for dep in &graph.node(n).config().dependencies {
            if dep.trigger != ProcessState::Running {
                continue;
            }
            let target = graph.node(dep.target_index);
            if target.is_included() && target.dependency_satisfied() {
                self.enqueue_node(graph, dep.target_index);
            }
        }
    }

    // -- reaper -----------------------------------------------------------

    /// Route one OS exit to the owning node.
    pub fn handle_exit(&self, pid: i32, status: i32) {
        let Some((g, n)) = self.pid_map.write().remove(&pid) else {
            self.ops.reaped(pid);
            return;
        };
        self.ops.reaped(pid);
        self.unregister_channel(pid);

        let graph = Arc::clone(&self.graphs[g]);
        let node = graph.node(n);
        node.set_exit_status(status);
        let state_before = node.state();
        let expected = state_before == ProcessState::Terminating
            || (node.config().manager.is_self_terminating && state_before == ProcessState::Running);

        let _ = node.try_set_state(ProcessState::Terminated);
        self.publish(&graph, n, ProcessState::Terminated);
        node.signal_terminated();

        if expected {
            debug!(group = %graph.name(), process = %node.config().process_id, status, "process terminated");
            let graph_active =
                matches!(graph.state(), GraphState::InTransition | GraphState::Cancelled);
            if graph_active && node.is_included() {
                if graph.is_starting() {
                    node.reset_to_idle();
                    self.walk_termination_successors(&graph, n);
                } else {
                    node.reset_to_idle();
                    self.walk_stop_successors(&graph, n);
                    self.phase_step_done(&graph);
                }
            } else {
                node.reset_to_idle();
            }
            return;
        }

        // Unexpected termination.
        let code = node.config().manager.execution_error_code;
        warn!(
            group = %graph.name(),
            process = %node.config().process_id,
            status,
            "unexpected termination"
        );
        node.reset_to_idle();

        let in_transition = graph.state() == GraphState::InTransition;
        if in_transition
            && graph.is_starting()
            && node.is_included()
            && state_before == ProcessState::Starting
            && node.take_restart_attempt()
        {
            debug!(group = %graph.name(), process = %node.config().process_id, attempt = node.restart_counter(), "restarting process");
            self.enqueue_node(&graph, n);
            return;
        }

        let reason = if in_transition {
            ControlCode::FailedUnexpectedTerminationOnEnter
        } else {
            ControlCode::FailedUnexpectedTermination
        };
        self.abort_graph(g, code, reason);
    }

    fn publish(&self, graph: &Arc<Graph>, n: u32, state: ProcessState) {
        let node = graph.node(n);
        if !node.config().startup.comms_type.is_reporting() {
            return;
        }
        if let Some(notifier) = &self.notifier {
            notifier.notify(node.config().process_id, state, graph.effective_state());
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
