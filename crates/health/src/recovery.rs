// SPDX-License-Identifier: Apache-2.0

//! Recovery notification: converts a stopped Global supervision into a
//! process-group state-change request towards the Launch Manager.
//!
//! The request itself is carried out by a [`RecoveryHandler`] (the recovery
//! client's forwarder thread); the notifier only drives the state machine
//! and polls the ticket each tick. A notifier constructed without
//! configuration is the "fire the watchdog" dummy: `send` takes it straight
//! to `Timeout`.

use std::sync::Arc;

use hale_core::config::RecoveryConfig;
use hale_core::{IdentifierHash, MonotonicClock, Nanos, SupervisionErrorInfo};
use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::error::HealthError;

/// Outcome slot shared with the forwarder thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketOutcome {
    Pending,
    Success,
    Error,
}

/// Handle to one in-flight recovery request.
#[derive(Debug, Clone, Default)]
pub struct RecoveryTicket {
    outcome: Arc<Mutex<TicketOutcome>>,
}

impl Default for TicketOutcome {
    fn default() -> Self {
        TicketOutcome::Pending
    }
}

impl RecoveryTicket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcome(&self) -> TicketOutcome {
        *self.outcome.lock()
    }

    /// Forwarder side: record the final outcome.
    pub fn resolve(&self, outcome: TicketOutcome) {
        *self.outcome.lock() = outcome;
    }
}

/// Issues recovery requests on behalf of a notifier.
pub trait RecoveryHandler {
    fn send_request(&mut self, group: IdentifierHash, state: IdentifierHash) -> Option<RecoveryTicket>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    Idle,
    Sending,
    WaitingForResponse,
    Timeout,
}

struct NotifierConfig {
    name: SmolStr,
    group: IdentifierHash,
    state: IdentifierHash,
    timeout: Nanos,
}

pub struct RecoveryNotifier {
    config: Option<NotifierConfig>,
    state: NotifierState,
    ticket: Option<RecoveryTicket>,
    start_ts: Nanos,
}

impl RecoveryNotifier {
    /// Parse the configured `/Group/State` target path.
    pub fn new(config: &RecoveryConfig) -> Result<Self, HealthError> {
        let path = config.target_path.as_str();
        let split = path.rfind('/').filter(|&i| i > 0).ok_or_else(|| {
            HealthError::RecoveryTarget { name: config.name.to_string(), path: path.to_string() }
        })?;
        Ok(Self {
            config: Some(NotifierConfig {
                name: config.name.clone(),
                group: IdentifierHash::of(&path[..split]),
                state: IdentifierHash::of(path),
                timeout: config.timeout_ns,
            }),
            state: NotifierState::Idle,
            ticket: None,
            start_ts: 0,
        })
    }

    /// The unconfigured notifier: any `send` fires the watchdog.
    pub fn dummy() -> Self {
        Self { config: None, state: NotifierState::Idle, ticket: None, start_ts: 0 }
    }

    pub fn name(&self) -> &str {
        self.config.as_ref().map(|c| c.name.as_str()).unwrap_or("<dummy>")
    }

    pub fn state(&self) -> NotifierState {
        self.state
    }

    /// Entry point for the Global supervision.
    pub fn send(&mut self, _info: &SupervisionErrorInfo) {
        if self.config.is_some() {
            if self.state == NotifierState::Idle {
                self.state = NotifierState::Sending;
            }
        } else {
            self.final_timeout();
        }
    }

    /// Advance the request; called once per daemon tick.
    pub fn cyclic_trigger(&mut self, clock: &dyn MonotonicClock, handler: &mut dyn RecoveryHandler) {
        if self.state == NotifierState::Sending {
            self.invoke_handler(clock, handler);
        }
        if self.state == NotifierState::WaitingForResponse {
            self.verify_response(clock);
        }
    }

    pub fn is_final_timeout_reached(&self) -> bool {
        self.state == NotifierState::Timeout
    }

    fn invoke_handler(&mut self, clock: &dyn MonotonicClock, handler: &mut dyn RecoveryHandler) {
        let Some(config) = &self.config else { return };
        self.ticket = handler.send_request(config.group, config.state);
        self.start_ts = clock.now_ns();
        info!(
            notification = %config.name,
            group = %config.group,
            state = %config.state,
            "recovery state requested"
        );
        self.state = NotifierState::WaitingForResponse;
    }

    fn verify_response(&mut self, clock: &dyn MonotonicClock) {
        let Some(ticket) = &self.ticket else {
            debug!(notification = %self.name(), "recovery request has no valid ticket");
            self.start_ts = 0;
            self.final_timeout();
            return;
        };

        match ticket.outcome() {
            TicketOutcome::Pending => {
                let lapsed = clock.now_ns().saturating_sub(self.start_ts);
                let timeout = self.config.as_ref().map(|c| c.timeout).unwrap_or(0);
                if lapsed > timeout {
                    debug!(notification = %self.name(), "recovery request timed out");
                    self.start_ts = 0;
                    self.final_timeout();
                }
            }
            TicketOutcome::Error => {
                warn!(notification = %self.name(), "recovery request returned an error");
                self.start_ts = 0;
                self.final_timeout();
            }
            TicketOutcome::Success => {
                debug!(notification = %self.name(), "recovery request acknowledged");
                self.start_ts = 0;
                self.ticket = None;
                self.state = NotifierState::Idle;
            }
        }
    }

    fn final_timeout(&mut self) {
        warn!(notification = %self.name(), "recovery notification reached final timeout");
        self.state = NotifierState::Timeout;
    }
}

#[cfg(test)]
#[path = "recovery_tests.rs"]
mod tests;
