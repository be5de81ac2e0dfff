// SPDX-License-Identifier: Apache-2.0

//! Alive supervision: counts checkpoint indications per reference cycle.

use hale_core::config::AliveConfig;
use hale_core::{ElementaryStatus, Nanos, ProcessState, SupervisionKind, EXECUTION_ERROR_DEFAULT};
use tracing::{debug, error, info, warn};

use crate::buffer::TimeSortingBuffer;
use crate::event::{CheckpointSnapshot, ProcessIdx, ProcessSnapshot, StatusUpdate, UpdateEvent};
use crate::supervision::{ElementaryCommon, EventKind};
use crate::tracker::ProcessStateTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataLossReason {
    SharedMemory,
    BufferFull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpireReason {
    DataLoss,
    FailedToleranceExceeded,
    Overflow,
    DataCorruption,
}

pub struct AliveSupervision {
    common: ElementaryCommon,
    reference_cycle: Nanos,
    min_indications: u32,
    max_indications: u32,
    min_disabled: bool,
    max_disabled: bool,
    tolerance: u32,
    /// The checkpoint producer whose execution error is reported.
    alive_process: ProcessIdx,
    buffer: TimeSortingBuffer<UpdateEvent>,
    status: ElementaryStatus,
    indications: u32,
    failed_cycles: u32,
    reference_cycle_start: Nanos,
    reference_cycle_end: Nanos,
    data_loss: Option<DataLossReason>,
}

impl AliveSupervision {
    pub fn new(index: usize, config: &AliveConfig) -> Self {
        let mut tracker =
            ProcessStateTracker::new(config.pg_states.clone(), config.processes.clone());
        // Alive only counts once the producer actually runs.
        tracker.set_active_marker(ProcessState::Running);
        Self {
            common: ElementaryCommon::new(
                config.name.clone(),
                (SupervisionKind::Alive, index),
                tracker,
            ),
            reference_cycle: config.reference_cycle_ns,
            min_indications: config.min_indications,
            max_indications: config.max_indications,
            min_disabled: config.min_disabled,
            max_disabled: config.max_disabled,
            tolerance: config.failed_cycles_tolerance,
            alive_process: config.processes[0],
            buffer: TimeSortingBuffer::new(config.buffer_size),
            status: ElementaryStatus::Deactivated,
            indications: 0,
            failed_cycles: 0,
            reference_cycle_start: 0,
            reference_cycle_end: u64::MAX,
            data_loss: None,
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
            self.data_loss = Some(DataLossReason::BufferFull);
            self.common.event_timestamp = self.common.last_sync;
        }
    }

    /// Shared-memory data loss reported by the monitor interface. A zero
    /// timestamp means the clock failed at the report site.
    pub fn on_data_loss(&mut self, timestamp: Nanos) {
        self.data_loss = Some(DataLossReason::SharedMemory);
        self.common.event_timestamp =
            if timestamp == 0 { self.common.last_sync } else { timestamp };
    }

    pub fn on_process_state(&mut self, snapshot: ProcessSnapshot) {
        if !self.common.tracker.is_relevant(snapshot.state) {
            return;
        }
        if !self.buffer.push(UpdateEvent::Process(snapshot), snapshot.timestamp) {
            self.data_loss = Some(DataLossReason::BufferFull);
            self.common.event_timestamp = self.common.last_sync;
        }
    }

    pub fn evaluate(&mut self, sync_ts: Nanos, out: &mut Vec<StatusUpdate>) {
        self.store_sync_event(sync_ts);

        if self.data_loss.is_some() {
            self.handle_data_loss(out);
            self.common.last_sync = sync_ts;
            return;
        }

        let mut pending = self.buffer.next().map(|(event, _)| event);
        while let Some(event) = pending {
            let mut event_ts = event.timestamp();
            let is_evaluation = self.detect_evaluation_event(event_ts, &event);
            if is_evaluation {
                event_ts = self.reference_cycle_end;
                self.common.event_timestamp = self.reference_cycle_end;
            }

            let kind = if is_evaluation {
                AliveEvent::Evaluation
            } else {
                AliveEvent::Kind(self.common.classify(&event))
            };

            match self.status {
                ElementaryStatus::Deactivated => {
                    if let AliveEvent::Kind(EventKind::Activation) = kind {
                        self.transition_out_of_deactivated(event_ts, out);
                    }
                }
                ElementaryStatus::Ok => self.transitions_out_of_ok(kind, event_ts, out),
                ElementaryStatus::Failed => self.transitions_out_of_failed(kind, event_ts, out),
                ElementaryStatus::Expired => {
                    // Expired is only left through deactivation, handled
                    // below with the common checks.
                }
            }

            if !self.check_recovery_transition(kind, event_ts, out) {
                self.check_deactivation(kind, event_ts, out);
            }

            // An evaluation event re-runs the same buffered event against
            // the advanced reference cycle.
            if is_evaluation {
                pending = Some(event);
            } else {
                pending = self.buffer.next().map(|(event, _)| event);
            }
        }

        self.buffer.clear();
        self.common.last_sync = sync_ts;
    }

    fn store_sync_event(&mut self, sync_ts: Nanos) {
        // Pushed through the buffer so a checkpoint reported exactly at the
        // sync timestamp still sorts before the sync event.
        if !self.buffer.push(UpdateEvent::Sync(sync_ts), sync_ts) {
            self.data_loss = Some(DataLossReason::BufferFull);
            self.common.event_timestamp = self.common.last_sync;
        }
    }

    fn handle_data_loss(&mut self, out: &mut Vec<StatusUpdate>) {
        if self.status != ElementaryStatus::Expired {
            self.switch_to_expired(ExpireReason::DataLoss, out);
        }
        self.buffer.clear();
        self.common.tracker.set_all_active();
        self.data_loss = None;
    }

    /// An evaluation event fires when the reference cycle ends before the
    /// event under consideration. A checkpoint exactly at the boundary
    /// still counts for the ending cycle; the sync event at the boundary
    /// triggers the evaluation.
    fn detect_evaluation_event(&self, event_ts: Nanos, event: &UpdateEvent) -> bool {
        if matches!(self.status, ElementaryStatus::Deactivated | ElementaryStatus::Expired) {
            return false;
        }
        self.reference_cycle_end < event_ts
            || (self.reference_cycle_end == event_ts && matches!(event, UpdateEvent::Sync(_)))
    }

    fn transition_out_of_deactivated(&mut self, event_ts: Nanos, out: &mut Vec<StatusUpdate>) {
        if !self.set_reference_cycle(event_ts, out) {
            self.common.event_timestamp = event_ts;
            self.switch_to_ok(out);
        }
    }

    fn check_deactivation(
        &mut self,
        kind: AliveEvent,
        event_ts: Nanos,
        out: &mut Vec<StatusUpdate>,
    ) {
        if matches!(kind, AliveEvent::Kind(EventKind::Deactivation))
            && self.status != ElementaryStatus::Deactivated
        {
            self.common.event_timestamp = event_ts;
            self.switch_to_deactivated(out);
        }
    }

    fn check_recovery_transition(
        &mut self,
        kind: AliveEvent,
        event_ts: Nanos,
        out: &mut Vec<StatusUpdate>,
    ) -> bool {
        if matches!(kind, AliveEvent::Kind(EventKind::RecoveredFromCrash)) {
            debug!(supervision = %self.common.name, "alive supervision recovering from crash");
            self.switch_to_deactivated(out);
            self.transition_out_of_deactivated(event_ts, out);
            return true;
        }
        false
    }

    fn transitions_out_of_ok(
        &mut self,
        kind: AliveEvent,
        event_ts: Nanos,
        out: &mut Vec<StatusUpdate>,
    ) {
        match kind {
            AliveEvent::Evaluation => self.evaluate_cycle_out_of_ok(out),
            AliveEvent::Kind(EventKind::Checkpoint) => self.count_indication(event_ts, out),
            _ => {}
        }
    }

    fn transitions_out_of_failed(
        &mut self,
        kind: AliveEvent,
        event_ts: Nanos,
        out: &mut Vec<StatusUpdate>,
    ) {
        match kind {
            AliveEvent::Evaluation => self.evaluate_cycle_out_of_failed(out),
            AliveEvent::Kind(EventKind::Checkpoint) => self.count_indication(event_ts, out),
            _ => {}
        }
    }

    fn evaluate_cycle_out_of_ok(&mut self, out: &mut Vec<StatusUpdate>) {
        if self.is_min_error() || self.is_max_error() {
            if self.failed_cycles < self.tolerance {
                self.switch_to_failed(out);
            } else {
                self.switch_to_expired(ExpireReason::FailedToleranceExceeded, out);
            }
        } else {
            self.set_next_cycle(out);
        }
    }

    fn evaluate_cycle_out_of_failed(&mut self, out: &mut Vec<StatusUpdate>) {
        if self.is_min_error() || self.is_max_error() {
            if self.failed_cycles == u32::MAX {
                error!(supervision = %self.common.name, "failed-cycle counter overflow");
                self.switch_to_expired(ExpireReason::Overflow, out);
                return;
            }
            self.failed_cycles += 1;
            if self.failed_cycles <= self.tolerance {
                self.log_failed_details();
                self.set_next_cycle(out);
            } else {
                self.switch_to_expired(ExpireReason::FailedToleranceExceeded, out);
            }
        } else {
            if self.failed_cycles <= 1 {
                self.switch_to_ok(out);
            } else {
                self.failed_cycles -= 1;
            }
            self.set_next_cycle(out);
        }
    }

    fn count_indication(&mut self, event_ts: Nanos, out: &mut Vec<StatusUpdate>) {
        if self.indications == u32::MAX {
            error!(supervision = %self.common.name, "indication counter overflow");
            self.common.event_timestamp = event_ts;
            self.switch_to_expired(ExpireReason::Overflow, out);
            return;
        }
        self.indications += 1;
    }

    /// Advance the window to `[base, base + reference_cycle)`. Returns true
    /// when the timestamps would overflow (the supervision expires).
    fn set_reference_cycle(&mut self, base: Nanos, out: &mut Vec<StatusUpdate>) -> bool {
        if base > u64::MAX - self.reference_cycle {
            error!(supervision = %self.common.name, "reference cycle timestamp overflow");
            self.common.event_timestamp = u64::MAX;
            self.switch_to_expired(ExpireReason::Overflow, out);
            return true;
        }
        self.reference_cycle_start = base;
        self.reference_cycle_end = base + self.reference_cycle;
        false
    }

    fn set_next_cycle(&mut self, out: &mut Vec<StatusUpdate>) {
        if !self.set_reference_cycle(self.reference_cycle_end, out) {
            self.indications = 0;
        }
    }

    fn is_min_error(&self) -> bool {
        !self.min_disabled && self.indications < self.min_indications
    }

    fn is_max_error(&self) -> bool {
        !self.max_disabled && self.indications > self.max_indications
    }

    fn switch_to_deactivated(&mut self, out: &mut Vec<StatusUpdate>) {
        self.status = ElementaryStatus::Deactivated;
        self.failed_cycles = 0;
        self.indications = 0;
        self.reference_cycle_start = 0;
        self.reference_cycle_end = u64::MAX;
        debug!(supervision = %self.common.name, "alive supervision deactivated");
        self.common.emit(self.status, out);
    }

    fn switch_to_ok(&mut self, out: &mut Vec<StatusUpdate>) {
        self.status = ElementaryStatus::Ok;
        self.failed_cycles = 0;
        info!(supervision = %self.common.name, "alive supervision ok");
        self.common.emit(self.status, out);
    }

    fn switch_to_failed(&mut self, out: &mut Vec<StatusUpdate>) {
        self.status = ElementaryStatus::Failed;
        self.failed_cycles += 1;
        self.log_failed_details();
        self.common.emit(self.status, out);
        self.set_next_cycle(out);
    }

    fn switch_to_expired(&mut self, reason: ExpireReason, out: &mut Vec<StatusUpdate>) {
        self.status = ElementaryStatus::Expired;
        self.common.last_exec_error = EXECUTION_ERROR_DEFAULT;

        match reason {
            ExpireReason::DataLoss => match self.data_loss {
                Some(DataLossReason::SharedMemory) => {
                    warn!(supervision = %self.common.name, "alive supervision expired: shared-memory overflow");
                }
                _ => {
                    warn!(supervision = %self.common.name, "alive supervision expired: event buffer overflow");
                }
            },
            ExpireReason::FailedToleranceExceeded => {
                self.log_failed_details();
                self.common.last_exec_error = self.common.error_for(self.alive_process);
            }
            ExpireReason::Overflow => {
                warn!(supervision = %self.common.name, "alive supervision expired: arithmetic overflow");
            }
            ExpireReason::DataCorruption => {
                warn!(supervision = %self.common.name, "alive supervision expired: data corruption");
            }
        }

        self.failed_cycles = self.tolerance;
        self.indications = 0;
        self.reference_cycle_start = 0;
        self.reference_cycle_end = u64::MAX;
        self.data_loss = None;

        self.common.emit(self.status, out);
    }

    fn log_failed_details(&self) {
        let min_error = self.is_min_error();
        let expected = if min_error { self.min_indications } else { self.max_indications };
        warn!(
            supervision = %self.common.name,
            status = self.status.as_str(),
            indications = self.indications,
            expected,
            failed_cycles = self.failed_cycles,
            tolerance = self.tolerance,
            "alive indications out of bounds"
        );
    }
}

/// Event classification extended with the synthetic evaluation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AliveEvent {
    Evaluation,
    Kind(EventKind),
}

#[cfg(test)]
#[path = "alive_tests.rs"]
mod tests;
