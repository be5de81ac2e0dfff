// SPDX-License-Identifier: Apache-2.0

//! Local supervision: aggregates the elementary supervisions of one logical
//! unit of supervision.

use hale_core::config::LocalConfig;
use hale_core::{ElementaryStatus, Nanos, SupervisionKind, EXECUTION_ERROR_DEFAULT};
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::buffer::TimeSortingBuffer;
use crate::event::{ElemRef, LocalStatusUpdate, StatusUpdate};

pub struct LocalSupervision {
    name: SmolStr,
    index: usize,
    buffer: TimeSortingBuffer<StatusUpdate>,
    /// Last seen status per registered elementary supervision.
    registered: Vec<(ElemRef, ElementaryStatus)>,
    status: ElementaryStatus,
    /// Elementary kind behind the last status change.
    kind: SupervisionKind,
    execution_error: u32,
    event_timestamp: Nanos,
    last_sync: Nanos,
    data_loss: Option<SupervisionKind>,
}

impl LocalSupervision {
    pub fn new(index: usize, config: &LocalConfig) -> Self {
        Self {
            name: config.name.clone(),
            index,
            buffer: TimeSortingBuffer::new(config.buffer_size),
            registered: config
                .elementaries
                .iter()
                .map(|&source| (source, ElementaryStatus::Deactivated))
                .collect(),
            status: ElementaryStatus::Deactivated,
            kind: SupervisionKind::Alive,
            execution_error: EXECUTION_ERROR_DEFAULT,
            event_timestamp: 0,
            last_sync: 0,
            data_loss: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ElementaryStatus {
        self.status
    }

    pub fn kind(&self) -> SupervisionKind {
        self.kind
    }

    pub fn timestamp(&self) -> Nanos {
        self.event_timestamp
    }

    pub fn execution_error(&self) -> u32 {
        self.execution_error
    }

    /// Buffer one elementary status change for the next evaluation.
    pub fn on_elementary(&mut self, update: StatusUpdate) {
        if !self.buffer.push(update, update.timestamp) {
            self.event_timestamp = self.last_sync;
            self.data_loss = Some(update.source.0);
        }
    }

    pub fn evaluate(&mut self, sync_ts: Nanos, out: &mut Vec<LocalStatusUpdate>) {
        if let Some(kind) = self.data_loss.take() {
            if self.status != ElementaryStatus::Expired {
                warn!(supervision = %self.name, "local supervision expired: data loss");
                self.kind = kind;
                self.execution_error = EXECUTION_ERROR_DEFAULT;
                self.status = ElementaryStatus::Expired;
                self.emit(out);
            }
            self.buffer.clear();
            self.last_sync = sync_ts;
            return;
        }

        while let Some((update, _)) = self.buffer.next() {
            if let Some(slot) = self.registered.iter_mut().find(|(r, _)| *r == update.source) {
                slot.1 = update.status;
            }
            self.update_state(&update, out);
        }

        self.buffer.clear();
        self.last_sync = sync_ts;
    }

    fn update_state(&mut self, update: &StatusUpdate, out: &mut Vec<LocalStatusUpdate>) {
        match self.status {
            ElementaryStatus::Deactivated => match update.status {
                ElementaryStatus::Ok => self.switch_to_ok(update, out),
                // Only alive supervisions report Failed.
                ElementaryStatus::Failed => self.switch_to_failed(update, out),
                // Reachable through data loss of the elementary.
                ElementaryStatus::Expired => self.switch_to_expired(update, out),
                ElementaryStatus::Deactivated => {}
            },
            ElementaryStatus::Ok => match update.status {
                ElementaryStatus::Deactivated => {
                    if self.all_deactivated() {
                        self.switch_to_deactivated(update, out);
                    }
                }
                ElementaryStatus::Failed => self.switch_to_failed(update, out),
                ElementaryStatus::Expired => self.switch_to_expired(update, out),
                ElementaryStatus::Ok => {}
            },
            ElementaryStatus::Failed => match update.status {
                ElementaryStatus::Deactivated => {
                    if self.all_deactivated() {
                        self.switch_to_deactivated(update, out);
                    }
                }
                ElementaryStatus::Ok => {
                    // No elementary has expired yet, so it suffices to
                    // check that none is still failed.
                    if !self.any_failed() {
                        self.switch_to_ok(update, out);
                    }
                }
                ElementaryStatus::Expired => self.switch_to_expired(update, out),
                ElementaryStatus::Failed => {}
            },
            ElementaryStatus::Expired => {
                if update.status == ElementaryStatus::Deactivated && self.all_deactivated() {
                    self.switch_to_deactivated(update, out);
                }
            }
        }
    }

    fn all_deactivated(&self) -> bool {
        self.registered.iter().all(|(_, s)| *s == ElementaryStatus::Deactivated)
    }

    fn any_failed(&self) -> bool {
        self.registered.iter().any(|(_, s)| *s == ElementaryStatus::Failed)
    }

    fn emit(&self, out: &mut Vec<LocalStatusUpdate>) {
        out.push(LocalStatusUpdate {
            local: self.index,
            status: self.status,
            kind: self.kind,
            timestamp: self.event_timestamp,
            execution_error: self.execution_error,
        });
    }

    fn switch_to_deactivated(&mut self, update: &StatusUpdate, out: &mut Vec<LocalStatusUpdate>) {
        debug!(supervision = %self.name, "local supervision deactivated");
        self.kind = update.source.0;
        self.event_timestamp = update.timestamp;
        self.status = ElementaryStatus::Deactivated;
        self.emit(out);
    }

    fn switch_to_ok(&mut self, update: &StatusUpdate, out: &mut Vec<LocalStatusUpdate>) {
        info!(supervision = %self.name, "local supervision ok");
        self.kind = update.source.0;
        self.event_timestamp = update.timestamp;
        self.status = ElementaryStatus::Ok;
        self.emit(out);
    }

    fn switch_to_failed(&mut self, update: &StatusUpdate, out: &mut Vec<LocalStatusUpdate>) {
        warn!(supervision = %self.name, "local supervision failed: alive supervision failed");
        self.kind = update.source.0;
        self.event_timestamp = update.timestamp;
        self.status = ElementaryStatus::Failed;
        self.emit(out);
    }

    fn switch_to_expired(&mut self, update: &StatusUpdate, out: &mut Vec<LocalStatusUpdate>) {
        warn!(
            supervision = %self.name,
            kind = update.source.0.as_str(),
            "local supervision expired"
        );
        self.kind = update.source.0;
        self.execution_error = update.execution_error;
        self.event_timestamp = update.timestamp;
        self.status = ElementaryStatus::Expired;
        self.emit(out);
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
