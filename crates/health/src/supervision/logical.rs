// SPDX-License-Identifier: Apache-2.0

//! Logical supervision: checks that checkpoints follow a configured graph.

use hale_core::config::LogicalConfig;
use hale_core::{ElementaryStatus, Nanos, ProcessState, SupervisionKind, EXECUTION_ERROR_DEFAULT};
use tracing::{debug, info, warn};

use crate::buffer::TimeSortingBuffer;
use crate::event::{
    CheckpointIdx, CheckpointSnapshot, ProcessIdx, ProcessSnapshot, StatusUpdate, UpdateEvent,
};
use crate::supervision::{ElementaryCommon, EventKind};
use crate::tracker::ProcessStateTracker;

struct GraphNode {
    checkpoint: CheckpointIdx,
    checkpoint_id: u32,
    is_final: bool,
    successors: Vec<usize>,
}

/// The single-cursor checkpoint graph.
struct Graph {
    nodes: Vec<GraphNode>,
    entries: Vec<usize>,
    active: bool,
    cursor: Option<usize>,
}

impl Graph {
    fn is_valid_transition(&mut self, checkpoint: CheckpointIdx) -> bool {
        if !self.active {
            match self.entries.iter().find(|&&e| self.nodes[e].checkpoint == checkpoint) {
                Some(&entry) => {
                    self.active = true;
                    self.cursor = Some(entry);
                    true
                }
                None => false,
            }
        } else {
            let Some(at) = self.cursor else { return false };
            match self.nodes[at]
                .successors
                .iter()
                .find(|&&s| self.nodes[s].checkpoint == checkpoint)
            {
                Some(&next) => {
                    self.cursor = Some(next);
                    if self.nodes[next].is_final {
                        self.active = false;
                    }
                    true
                }
                None => false,
            }
        }
    }

    fn reset(&mut self) {
        self.active = false;
        self.cursor = None;
    }

    fn current_checkpoint_id(&self) -> Option<u32> {
        self.cursor.map(|at| self.nodes[at].checkpoint_id)
    }
}

pub struct LogicalSupervision {
    common: ElementaryCommon,
    graph: Graph,
    buffer: TimeSortingBuffer<UpdateEvent>,
    status: ElementaryStatus,
    /// Owning process per checkpoint, for error attribution and logging.
    checkpoint_process: Vec<ProcessIdx>,
    data_loss: bool,
}

impl LogicalSupervision {
    /// `checkpoint_process` maps every checkpoint index of the cluster to
    /// its owning process.
    pub fn new(
        index: usize,
        config: &LogicalConfig,
        checkpoint_ids: &[u32],
        checkpoint_process: Vec<ProcessIdx>,
    ) -> Self {
        let tracker = ProcessStateTracker::new(config.pg_states.clone(), config.processes.clone());
        let nodes = config
            .nodes
            .iter()
            .map(|n| GraphNode {
                checkpoint: n.checkpoint,
                checkpoint_id: checkpoint_ids.get(n.checkpoint).copied().unwrap_or(0),
                is_final: n.is_final,
                successors: n.successors.clone(),
            })
            .collect();
        Self {
            common: ElementaryCommon::new(
                config.name.clone(),
                (SupervisionKind::Logical, index),
                tracker,
            ),
            graph: Graph { nodes, entries: config.entries.clone(), active: false, cursor: None },
            buffer: TimeSortingBuffer::new(config.buffer_size),
            status: ElementaryStatus::Deactivated,
            checkpoint_process,
            data_loss: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.common.name
    }

    pub fn status(&self) -> ElementaryStatus {
        self.status
    }

    pub fn timestamp(&self) -> Nanos {
        self.common.event_timestamp
    }

    pub fn execution_error(&self) -> u32 {
        self.common.last_exec_error
    }

    pub fn on_checkpoint(&mut self, snapshot: CheckpointSnapshot) {
        if !self.buffer.push(UpdateEvent::Checkpoint(snapshot), snapshot.timestamp) {
            self.data_loss = true;
            self.common.event_timestamp = self.common.last_sync;
        }
    }

    pub fn on_data_loss(&mut self, timestamp: Nanos) {
        self.data_loss = true;
        self.common.event_timestamp =
            if timestamp == 0 { self.common.last_sync } else { timestamp };
    }

    pub fn on_process_state(&mut self, snapshot: ProcessSnapshot) {
        if !self.common.tracker.is_relevant(snapshot.state) {
            return;
        }
        if !self.buffer.push(UpdateEvent::Process(snapshot), snapshot.timestamp) {
            self.data_loss = true;
            self.common.event_timestamp = self.common.last_sync;
        }
    }

    pub fn evaluate(&mut self, sync_ts: Nanos, out: &mut Vec<StatusUpdate>) {
        if self.data_loss {
            if self.status != ElementaryStatus::Expired {
                self.switch_to_expired_data_loss(out);
            }
            self.buffer.clear();
            self.common.tracker.set_all_active();
            self.data_loss = false;
            self.common.last_sync = sync_ts;
            return;
        }

        while let Some((event, _)) = self.buffer.next() {
            let event_ts = event.timestamp();
            let kind = self.common.classify(&event);

            match self.status {
                ElementaryStatus::Deactivated => {
                    if kind == EventKind::Activation {
                        self.common.event_timestamp = event_ts;
                        self.switch_to_ok(out);
                    }
                }
                ElementaryStatus::Ok => self.transitions_out_of_ok(kind, event_ts, &event, out),
                ElementaryStatus::Expired => {}
                ElementaryStatus::Failed => {
                    // A logical supervision never reports Failed.
                    self.common.event_timestamp = self.common.last_sync;
                    self.switch_to_expired_corruption(out);
                }
            }

            if !self.check_recovery_transition(kind, event_ts, out) {
                self.check_deactivation(kind, event_ts, out);
            }
        }

        self.buffer.clear();
        self.common.last_sync = sync_ts;
    }

    fn check_deactivation(&mut self, kind: EventKind, event_ts: Nanos, out: &mut Vec<StatusUpdate>) {
        if kind == EventKind::Deactivation && self.status != ElementaryStatus::Deactivated {
            self.common.event_timestamp = event_ts;
            self.switch_to_deactivated(out);
        }
    }

    fn check_recovery_transition(
        &mut self,
        kind: EventKind,
        event_ts: Nanos,
        out: &mut Vec<StatusUpdate>,
    ) -> bool {
        if kind == EventKind::RecoveredFromCrash {
            debug!(supervision = %self.common.name, "logical supervision recovering from crash");
            self.switch_to_deactivated(out);
            self.common.event_timestamp = event_ts;
            self.switch_to_ok(out);
            return true;
        }
        false
    }

    fn transitions_out_of_ok(
        &mut self,
        kind: EventKind,
        event_ts: Nanos,
        event: &UpdateEvent,
        out: &mut Vec<StatusUpdate>,
    ) {
        if kind != EventKind::Checkpoint {
            return;
        }
        let UpdateEvent::Checkpoint(snapshot) = event else { return };
        self.common.event_timestamp = event_ts;

        let was_active = self.graph.active;
        let current = self.graph.current_checkpoint_id();
        if !self.graph.is_valid_transition(snapshot.checkpoint) {
            let process =
                self.checkpoint_process.get(snapshot.checkpoint).copied().unwrap_or_default();
            self.common.last_exec_error = self.common.error_for(process);
            if was_active {
                warn!(
                    supervision = %self.common.name,
                    current_checkpoint = current,
                    reported_checkpoint = snapshot.id,
                    process,
                    "logical supervision expired: no transition from the current checkpoint"
                );
            } else {
                warn!(
                    supervision = %self.common.name,
                    reported_checkpoint = snapshot.id,
                    process,
                    "logical supervision expired: reported checkpoint is not an entry point"
                );
            }
            self.status = ElementaryStatus::Expired;
            self.common.emit(self.status, out);
        }
    }

    fn switch_to_deactivated(&mut self, out: &mut Vec<StatusUpdate>) {
        debug!(supervision = %self.common.name, "logical supervision deactivated");
        self.status = ElementaryStatus::Deactivated;
        self.graph.reset();
        self.common.emit(self.status, out);
    }

    fn switch_to_ok(&mut self, out: &mut Vec<StatusUpdate>) {
        info!(supervision = %self.common.name, "logical supervision ok");
        self.status = ElementaryStatus::Ok;
        self.common.emit(self.status, out);
    }

    fn switch_to_expired_data_loss(&mut self, out: &mut Vec<StatusUpdate>) {
        warn!(supervision = %self.common.name, "logical supervision expired: data loss");
        self.common.last_exec_error = EXECUTION_ERROR_DEFAULT;
        self.status = ElementaryStatus::Expired;
        self.common.emit(self.status, out);
    }

    fn switch_to_expired_corruption(&mut self, out: &mut Vec<StatusUpdate>) {
        warn!(supervision = %self.common.name, "logical supervision expired: data corruption");
        self.common.last_exec_error = EXECUTION_ERROR_DEFAULT;
        self.status = ElementaryStatus::Expired;
        self.common.emit(self.status, out);
    }
}

#[cfg(test)]
#[path = "logical_tests.rs"]
mod tests;
