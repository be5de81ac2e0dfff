// SPDX-License-Identifier: Apache-2.0

//! Deadline supervision: bounds the time between a source and a target
//! checkpoint.

use hale_core::config::DeadlineConfig;
use hale_core::{ElementaryStatus, Nanos, ProcessState, SupervisionKind, EXECUTION_ERROR_DEFAULT};
use tracing::{debug, info, warn};

use crate::buffer::TimeSortingBuffer;
use crate::event::{
    CheckpointIdx, CheckpointSnapshot, ProcessIdx, ProcessSnapshot, StatusUpdate, UpdateEvent,
};
use crate::supervision::{ElementaryCommon, EventKind};
use crate::tracker::ProcessStateTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdvState {
    Deactivated,
    Ok,
    ConsecutiveSource,
    MaxDeadline,
    MinDeadline,
    RingOverflow,
    HistoryOverflow,
    DataError,
}

#[derive(Debug, Clone, Copy)]
struct FailureInfo {
    lapsed: Nanos,
    target_received: bool,
}

pub struct DeadlineSupervision {
    common: ElementaryCommon,
    min_deadline: Nanos,
    max_deadline: Nanos,
    min_disabled: bool,
    max_disabled: bool,
    source: CheckpointIdx,
    target: CheckpointIdx,
    /// Producer of the source / target checkpoint, for error attribution.
    source_process: ProcessIdx,
    target_process: ProcessIdx,
    buffer: TimeSortingBuffer<UpdateEvent>,
    status: ElementaryStatus,
    adv: AdvState,
    source_ts: Nanos,
    target_ts: Nanos,
    failure: Option<FailureInfo>,
    data_loss: bool,
}

impl DeadlineSupervision {
    pub fn new(
        index: usize,
        config: &DeadlineConfig,
        source_process: ProcessIdx,
        target_process: ProcessIdx,
    ) -> Self {
        let mut tracker =
            ProcessStateTracker::new(config.pg_states.clone(), config.processes.clone());
        tracker.set_active_marker(ProcessState::Running);
        Self {
            common: ElementaryCommon::new(
                config.name.clone(),
                (SupervisionKind::Deadline, index),
                tracker,
            ),
            min_deadline: config.min_deadline_ns,
            max_deadline: config.max_deadline_ns,
            min_disabled: config.min_disabled,
            max_disabled: config.max_disabled,
            source: config.source,
            target: config.target,
            source_process,
            target_process,
            buffer: TimeSortingBuffer::new(config.buffer_size),
            status: ElementaryStatus::Deactivated,
            adv: AdvState::Deactivated,
            source_ts: 0,
            target_ts: 0,
            failure: None,
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
            self.adv = AdvState::HistoryOverflow;
            self.common.event_timestamp = self.common.last_sync;
        }
    }

    pub fn on_data_loss(&mut self, _timestamp: Nanos) {
        self.data_loss = true;
        self.adv = AdvState::RingOverflow;
        self.common.event_timestamp = self.common.last_sync;
    }

    pub fn on_process_state(&mut self, snapshot: ProcessSnapshot) {
        if !self.common.tracker.is_relevant(snapshot.state) {
            return;
        }
        if !self.buffer.push(UpdateEvent::Process(snapshot), snapshot.timestamp) {
            self.data_loss = true;
            self.adv = AdvState::HistoryOverflow;
            self.common.event_timestamp = self.common.last_sync;
        }
    }

    pub fn evaluate(&mut self, sync_ts: Nanos, out: &mut Vec<StatusUpdate>) {
        if self.data_loss {
            self.handle_data_loss(out);
            self.common.last_sync = sync_ts;
            return;
        }

        while let Some((event, _)) = self.buffer.next() {
            self.check_transitions(&event, out);
        }

        // The sync event is always the newest element; no need to sort it
        // into the buffer.
        self.check_transitions(&UpdateEvent::Sync(sync_ts), out);

        self.buffer.clear();
        self.common.last_sync = sync_ts;
    }

    fn check_transitions(&mut self, event: &UpdateEvent, out: &mut Vec<StatusUpdate>) {
        let event_ts = event.timestamp();
        let kind = self.common.classify(event);

        match self.status {
            ElementaryStatus::Deactivated => {
                if kind == EventKind::Activation {
                    self.common.event_timestamp = event_ts;
                    self.switch_to_ok(out);
                }
            }
            ElementaryStatus::Ok => self.transitions_out_of_ok(kind, event_ts, event, out),
            ElementaryStatus::Expired => {
                // Only deactivation leaves Expired; handled below.
            }
            ElementaryStatus::Failed => {
                // A deadline supervision never reports Failed.
                self.common.event_timestamp = self.common.last_sync;
                self.adv = AdvState::DataError;
                self.switch_to_expired(out);
            }
        }

        if !self.check_recovery_transition(kind, event_ts, out) {
            self.check_deactivation(kind, event_ts, out);
        }
    }

    fn handle_data_loss(&mut self, out: &mut Vec<StatusUpdate>) {
        if self.status != ElementaryStatus::Expired {
            self.switch_to_expired(out);
        }
        self.buffer.clear();
        self.common.tracker.set_all_active();
        self.data_loss = false;
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
            debug!(supervision = %self.common.name, "deadline supervision recovering from crash");
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
        if kind == EventKind::Checkpoint {
            if let UpdateEvent::Checkpoint(snapshot) = event {
                if snapshot.checkpoint == self.source {
                    self.evaluate_source(event_ts);
                } else if snapshot.checkpoint == self.target {
                    self.evaluate_target(event_ts);
                }
            }
        } else {
            self.evaluate_missing_target(event_ts);
        }

        if self.adv != AdvState::Ok {
            self.switch_to_expired(out);
        }
    }

    fn evaluate_source(&mut self, event_ts: Nanos) {
        if self.source_ts != 0 {
            self.adv = AdvState::ConsecutiveSource;
            self.common.event_timestamp = event_ts;
            self.reset_timestamps();
        } else {
            self.source_ts = event_ts;
        }
    }

    fn evaluate_target(&mut self, event_ts: Nanos) {
        self.target_ts = event_ts;
        let lapsed = event_ts.saturating_sub(self.source_ts);
        self.common.event_timestamp = event_ts;
        if self.source_ts == 0 {
            // Target without a source is ignored.
            self.target_ts = 0;
        } else {
            self.evaluate_deadline(lapsed, true);
        }
    }

    fn evaluate_missing_target(&mut self, event_ts: Nanos) {
        if self.source_ts != 0 {
            let lapsed = event_ts.saturating_sub(self.source_ts);
            self.evaluate_deadline(lapsed, false);
        }
    }

    fn evaluate_deadline(&mut self, lapsed: Nanos, target_received: bool) {
        if !self.max_disabled && lapsed > self.max_deadline {
            self.adv = AdvState::MaxDeadline;
            self.common.event_timestamp =
                self.source_ts.saturating_add(self.max_deadline).saturating_add(1);
            self.reset_timestamps();
        } else if target_received {
            if !self.min_disabled && lapsed < self.min_deadline {
                self.adv = AdvState::MinDeadline;
            } else {
                self.adv = AdvState::Ok;
            }
            self.reset_timestamps();
        }
        // Otherwise: target not yet reported and the max deadline has not
        // passed; keep waiting.

        if matches!(self.adv, AdvState::MinDeadline | AdvState::MaxDeadline) {
            self.failure = Some(FailureInfo { lapsed, target_received });
        }
    }

    fn reset_timestamps(&mut self) {
        self.source_ts = 0;
        self.target_ts = 0;
    }

    fn switch_to_deactivated(&mut self, out: &mut Vec<StatusUpdate>) {
        self.status = ElementaryStatus::Deactivated;
        self.adv = AdvState::Deactivated;
        debug!(supervision = %self.common.name, "deadline supervision deactivated");
        self.reset_timestamps();
        self.common.emit(self.status, out);
    }

    fn switch_to_ok(&mut self, out: &mut Vec<StatusUpdate>) {
        self.status = ElementaryStatus::Ok;
        self.adv = AdvState::Ok;
        info!(supervision = %self.common.name, "deadline supervision ok");
        self.common.emit(self.status, out);
    }

    fn switch_to_expired(&mut self, out: &mut Vec<StatusUpdate>) {
        self.common.last_exec_error = EXECUTION_ERROR_DEFAULT;

        match self.adv {
            AdvState::ConsecutiveSource => {
                warn!(
                    supervision = %self.common.name,
                    "deadline supervision expired: two source checkpoints reported consecutively"
                );
                self.common.last_exec_error = self.common.error_for(self.source_process);
            }
            AdvState::MaxDeadline => {
                let info = self.failure;
                warn!(
                    supervision = %self.common.name,
                    lapsed_ns = info.map(|f| f.lapsed),
                    target_received = info.map(|f| f.target_received),
                    max_deadline_ns = self.max_deadline,
                    "deadline supervision expired: maximum deadline exceeded"
                );
                self.common.last_exec_error = self.common.error_for(self.target_process);
            }
            AdvState::MinDeadline => {
                let info = self.failure;
                warn!(
                    supervision = %self.common.name,
                    lapsed_ns = info.map(|f| f.lapsed),
                    min_deadline_ns = self.min_deadline,
                    "deadline supervision expired: target before the minimum deadline"
                );
                self.common.last_exec_error = self.common.error_for(self.target_process);
            }
            AdvState::RingOverflow => {
                warn!(supervision = %self.common.name, "deadline supervision expired: ring buffer overflow");
            }
            AdvState::HistoryOverflow => {
                warn!(supervision = %self.common.name, "deadline supervision expired: history buffer overflow");
            }
            _ => {
                warn!(supervision = %self.common.name, "deadline supervision expired: data corruption");
            }
        }

        self.status = ElementaryStatus::Expired;
        self.data_loss = false;
        self.failure = None;
        self.reset_timestamps();
        self.common.emit(self.status, out);
    }
}

#[cfg(test)]
#[path = "deadline_tests.rs"]
mod tests;
