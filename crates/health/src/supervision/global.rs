// SPDX-License-Identifier: Apache-2.0

//! Global supervision: aggregates the local supervisions of one process
//! group and debounces `Expired` into `Stopped`.

use hale_core::config::GlobalConfig;
use hale_core::{
    ElementaryStatus, GlobalStatus, IdentifierHash, Nanos, ProcessState, SupervisionErrorInfo,
    SupervisionKind, EXECUTION_ERROR_DEFAULT,
};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::buffer::TimeSortingBuffer;
use crate::event::{LocalStatusUpdate, ProcessSnapshot};

/// One entry of the global supervision's time-sorted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalEvent {
    Local(LocalStatusUpdate),
    /// A process-group-state change carrying the new expired tolerance.
    PgState { tolerance: Nanos, timestamp: Nanos },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    ExpirationTimeout,
    HistoryBufferOverflow,
}

pub struct GlobalSupervision {
    name: SmolStr,
    buffer: TimeSortingBuffer<GlobalEvent>,
    /// Last seen status per registered local supervision.
    locals: Vec<(usize, ElementaryStatus)>,
    pg_states: Vec<IdentifierHash>,
    tolerances: Vec<Nanos>,
    /// Recovery notifiers to inform on `Stopped`.
    recoveries: Vec<usize>,
    status: GlobalStatus,
    expired_tolerance: Nanos,
    expired_start: Nanos,
    expired_kind: SupervisionKind,
    execution_error: u32,
    data_loss: bool,
}

impl GlobalSupervision {
    pub fn new(config: &GlobalConfig) -> Self {
        Self {
            name: config.name.clone(),
            buffer: TimeSortingBuffer::new(config.buffer_size),
            locals: config.locals.iter().map(|&l| (l, ElementaryStatus::Deactivated)).collect(),
            pg_states: config.pg_states.clone(),
            tolerances: config.expired_tolerances_ns.clone(),
            recoveries: config.recoveries.clone(),
            status: GlobalStatus::Deactivated,
            expired_tolerance: 0,
            expired_start: u64::MAX,
            expired_kind: SupervisionKind::Alive,
            execution_error: EXECUTION_ERROR_DEFAULT,
            data_loss: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> GlobalStatus {
        self.status
    }

    pub fn recoveries(&self) -> &[usize] {
        &self.recoveries
    }

    /// Track process-group-state changes through the processes of this
    /// group. Only `Starting`/`Running` updates are honoured: depending on
    /// the stop/start order of a transition, the terminating states of the
    /// old pg state may arrive after the new state's activation, and must
    /// not clobber the new tolerance.
    pub fn on_process_state(&mut self, snapshot: &ProcessSnapshot) {
        if !matches!(snapshot.state, ProcessState::Starting | ProcessState::Running) {
            return;
        }
        // The lowest tolerance is used for a pg state the configuration
        // does not know.
        let tolerance = self
            .pg_states
            .iter()
            .position(|s| *s == snapshot.pg_state)
            .and_then(|i| self.tolerances.get(i).copied())
            .unwrap_or(0);
        let event = GlobalEvent::PgState { tolerance, timestamp: snapshot.timestamp };
        if !self.buffer.push(event, snapshot.timestamp) {
            self.data_loss = true;
        }
    }

    pub fn on_local(&mut self, update: LocalStatusUpdate) {
        if !self.buffer.push(GlobalEvent::Local(update), update.timestamp) {
            self.data_loss = true;
        }
    }

    /// Advance the state machine. Every `Stopped` entry appends the error
    /// info to dispatch to this supervision's recovery notifiers.
    pub fn evaluate(&mut self, sync_ts: Nanos, out: &mut Vec<SupervisionErrorInfo>) {
        if self.data_loss {
            self.expired_kind = SupervisionKind::Alive;
            self.execution_error = EXECUTION_ERROR_DEFAULT;
            self.switch_to_stopped(StopReason::HistoryBufferOverflow, out);
            self.buffer.clear();
            self.data_loss = false;
            return;
        }

        while let Some((event, _)) = self.buffer.next() {
            match event {
                GlobalEvent::PgState { tolerance, timestamp } => {
                    self.expired_tolerance = tolerance;
                    if self.status == GlobalStatus::Expired && self.is_debounced(timestamp) {
                        self.switch_to_stopped(StopReason::ExpirationTimeout, out);
                    }
                }
                GlobalEvent::Local(update) => self.evaluate_local_update(update, out),
            }
        }
        self.buffer.clear();

        // The debounce timer also runs against the tick itself.
        if self.status == GlobalStatus::Expired && self.is_debounced(sync_ts) {
            self.switch_to_stopped(StopReason::ExpirationTimeout, out);
        }
    }

    fn evaluate_local_update(
        &mut self,
        update: LocalStatusUpdate,
        out: &mut Vec<SupervisionErrorInfo>,
    ) {
        if let Some(slot) = self.locals.iter_mut().find(|(l, _)| *l == update.local) {
            slot.1 = update.status;
        }

        match self.status {
            GlobalStatus::Deactivated => match update.status {
                ElementaryStatus::Ok => self.switch_to_ok(),
                ElementaryStatus::Failed => self.switch_to_failed(),
                ElementaryStatus::Expired => self.enter_expired(&update, out),
                ElementaryStatus::Deactivated => {}
            },
            GlobalStatus::Ok => match update.status {
                ElementaryStatus::Deactivated => {
                    if self.aggregate().is_none() {
                        self.switch_to_deactivated();
                    }
                }
                ElementaryStatus::Failed => self.switch_to_failed(),
                ElementaryStatus::Expired => self.enter_expired(&update, out),
                ElementaryStatus::Ok => {}
            },
            GlobalStatus::Failed => match update.status {
                ElementaryStatus::Expired => self.enter_expired(&update, out),
                ElementaryStatus::Failed => {}
                _ => match self.aggregate() {
                    None => self.switch_to_deactivated(),
                    Some(ElementaryStatus::Ok) => self.switch_to_ok(),
                    _ => {}
                },
            },
            GlobalStatus::Expired => {
                if self.is_debounced(update.timestamp) {
                    self.switch_to_stopped(StopReason::ExpirationTimeout, out);
                } else if update.status != ElementaryStatus::Expired {
                    match self.aggregate() {
                        None => self.switch_to_deactivated(),
                        Some(ElementaryStatus::Ok) => self.switch_to_ok(),
                        Some(ElementaryStatus::Failed) => self.switch_to_failed(),
                        _ => {}
                    }
                }
            }
            GlobalStatus::Stopped => match self.aggregate() {
                None => self.switch_to_deactivated(),
                Some(ElementaryStatus::Ok) => self.switch_to_ok(),
                Some(ElementaryStatus::Failed) => self.switch_to_failed(),
                _ => {}
            },
        }
    }

    fn enter_expired(&mut self, update: &LocalStatusUpdate, out: &mut Vec<SupervisionErrorInfo>) {
        self.expired_kind = update.kind;
        self.execution_error = update.execution_error;
        if self.is_debounced(update.timestamp) {
            self.switch_to_stopped(StopReason::ExpirationTimeout, out);
        } else {
            self.switch_to_expired(update.timestamp);
        }
    }

    /// Worst status over all registered locals; `None` when every local is
    /// deactivated.
    fn aggregate(&self) -> Option<ElementaryStatus> {
        self.locals
            .iter()
            .filter(|(_, s)| *s != ElementaryStatus::Deactivated)
            .map(|&(_, s)| s)
            .max_by_key(|s| s.severity())
    }

    /// Whether the expiry has been pending long enough at time `now`.
    fn is_debounced(&mut self, now: Nanos) -> bool {
        let now = if now == 0 {
            // Clock failure: fail safe, attribute to the internal error.
            self.expired_kind = SupervisionKind::Alive;
            self.execution_error = EXECUTION_ERROR_DEFAULT;
            u64::MAX
        } else {
            now
        };
        if self.expired_tolerance == 0 {
            return true;
        }
        let tolerance_end = self.expired_start.saturating_add(self.expired_tolerance);
        now >= tolerance_end
    }

    fn switch_to_deactivated(&mut self) {
        debug!(supervision = %self.name, "global supervision deactivated");
        self.status = GlobalStatus::Deactivated;
        self.expired_start = u64::MAX;
        self.expired_tolerance = 0;
    }

    fn switch_to_ok(&mut self) {
        info!(supervision = %self.name, "global supervision ok");
        self.status = GlobalStatus::Ok;
        self.expired_start = u64::MAX;
    }

    fn switch_to_failed(&mut self) {
        warn!(supervision = %self.name, "global supervision failed");
        self.status = GlobalStatus::Failed;
        self.expired_start = u64::MAX;
    }

    fn switch_to_expired(&mut self, start: Nanos) {
        warn!(supervision = %self.name, "global supervision expired");
        self.status = GlobalStatus::Expired;
        self.expired_start = start;
    }

    fn switch_to_stopped(&mut self, reason: StopReason, out: &mut Vec<SupervisionErrorInfo>) {
        match reason {
            StopReason::ExpirationTimeout => {
                warn!(supervision = %self.name, "global supervision stopped: expired tolerance exceeded");
            }
            StopReason::HistoryBufferOverflow => {
                warn!(supervision = %self.name, "global supervision stopped: history buffer overflow");
            }
        }
        self.status = GlobalStatus::Stopped;
        self.expired_start = u64::MAX;

        out.push(SupervisionErrorInfo {
            execution_error: self.execution_error,
            kind: self.expired_kind,
        });
    }
}

#[cfg(test)]
#[path = "global_tests.rs"]
mod tests;
