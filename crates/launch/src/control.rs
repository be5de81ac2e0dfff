// SPDX-License-Identifier: Apache-2.0

//! The control-request handler: the Launch Manager side of the
//! state-manager protocol.
//!
//! One thread, woken by the global nudge semaphore, scans every registered
//! state-manager channel for requests, dispatches them to the graphs, and
//! delivers the deferred responses and asynchronous events the graphs have
//! accumulated. A response that cannot be posted because the client has not
//! consumed the previous one is kept in a backlog and retried on the next
//! pass.

use std::sync::Arc;

use hale_core::limits::HANDLER_POLL_DELAY;
use hale_core::wire::{ControlCode, ControlMessage, ProcessGroupStateId};
use hale_shm::HandlerNudge;
use tracing::{debug, warn};

use crate::graph::Origin;
use crate::manager::{Engine, SetStateOutcome};
use crate::osal::ProcessOps;

pub struct ControlHandler<O: ProcessOps> {
    engine: Arc<Engine<O>>,
    /// Responses whose slot was busy, retried each pass.
    backlog: Vec<(usize, ControlMessage)>,
}

impl<O: ProcessOps> ControlHandler<O> {
    pub fn new(engine: Arc<Engine<O>>) -> Self {
        Self { engine, backlog: Vec::new() }
    }

    /// Handler thread body: scan on every nudge, or periodically as a
    /// fallback.
    pub fn run(&mut self, nudge: &HandlerNudge) {
        while !self.engine.is_shutting_down() {
            let _ = nudge.wait_timeout(HANDLER_POLL_DELAY);
            self.scan();
        }
    }

    /// One full pass over channels, graph events and the initial-state
    /// result.
    pub fn scan(&mut self) {
        self.flush_backlog();
        self.scan_requests();
        self.deliver_graph_events();
        self.deliver_initial_results();
    }

    fn flush_backlog(&mut self) {
        let engine = &self.engine;
        self.backlog.retain(|(slot, msg)| {
            match engine.channel_block(*slot).and_then(|block| {
                block.control().map(|chan| chan.post_response(msg))
            }) {
                // Channel gone: drop the message.
                None => false,
                // Posted: drop. Still busy: keep.
                Some(posted) => !posted,
            }
        });
    }

    fn scan_requests(&mut self) {
        for (slot, block) in self.engine.channels() {
            let Some(chan) = block.control() else { continue };
            while let Some(request) = chan.try_take_request() {
                if let Some(response) = self.dispatch(slot, &request) {
                    if !chan.post_response(&response) {
                        self.backlog.push((slot, response));
                    }
                }
            }
        }
    }

    /// Dispatch one request; `Some` is an immediate response.
    fn dispatch(&mut self, slot: usize, request: &ControlMessage) -> Option<ControlMessage> {
        let code = request.decoded_code();
        let group = request.pg_state.group_id();
        let state = request.pg_state.state_id();
        debug!(code = code.as_str(), group = %group, "control request");

        match code {
            ControlCode::SetStateRequest => {
                let origin = Origin::Channel { slot, client: request.client };
                let outcome = self.engine.set_state(group, state, origin);
                let immediate = match outcome {
                    SetStateOutcome::InvalidGroup | SetStateOutcome::InvalidState => {
                        Some(ControlCode::SetStateInvalidArguments)
                    }
                    SetStateOutcome::AlreadyInState => Some(ControlCode::SetStateAlreadyInState),
                    SetStateOutcome::TransitionToSameState => {
                        Some(ControlCode::SetStateTransitionToSameState)
                    }
                    SetStateOutcome::Rejected => Some(ControlCode::SetStateFailed),
                    // Deferred: answered through the graph's events.
                    SetStateOutcome::Started | SetStateOutcome::Pending => None,
                };
                immediate.map(|code| ControlMessage::response_to(request, code))
            }

            ControlCode::GetInitialMachineStateRequest => {
                let result = self.engine.initial_result();
                if result == ControlCode::InitialMachineStateNotSet {
                    // Parked until the initial transition resolves; only
                    // channels that asked receive the result.
                    if let Some(block) = self.engine.channel_block(slot) {
                        if let Some(chan) = block.control() {
                            chan.note_initial_request();
                        }
                    }
                    None
                } else {
                    Some(ControlMessage::response_to(request, result))
                }
            }

            ControlCode::GetExecutionErrorRequest => {
                let response = match self.engine.execution_error(group) {
                    None => ControlMessage::response_to(
                        request,
                        ControlCode::ExecutionErrorInvalidArguments,
                    ),
                    Some(None) => ControlMessage::response_to(
                        request,
                        ControlCode::ExecutionErrorRequestFailed,
                    ),
                    Some(Some(code)) => {
                        let mut msg = ControlMessage::response_to(
                            request,
                            ControlCode::ExecutionErrorRequestSuccess,
                        );
                        msg.execution_error = code;
                        msg
                    }
                };
                Some(response)
            }

            ControlCode::ValidateProcessGroupState => {
                let valid = self.engine.validate_state(group, state);
                let code = if valid {
                    ControlCode::ValidateProcessGroupStateSuccess
                } else {
                    ControlCode::ValidateProcessGroupStateFailed
                };
                Some(ControlMessage::response_to(request, code))
            }

            other => {
                warn!(code = other.as_str(), "unrecognised control request");
                Some(ControlMessage::response_to(request, ControlCode::InvalidRequest))
            }
        }
    }

    fn deliver_graph_events(&mut self) {
        for g in 0..self.engine.graphs().len() {
            let graph = Arc::clone(self.engine.graph(g));
            for event in graph.take_events() {
                match event.origin {
                    Origin::Channel { slot, client } => {
                        let msg = ControlMessage {
                            client,
                            pg_state: ProcessGroupStateId::new(
                                graph.name(),
                                graph.requested_state(),
                            ),
                            code: event.code as u32,
                            execution_error: event.execution_error,
                        };
                        match self
                            .engine
                            .channel_block(slot)
                            .and_then(|block| block.control().map(|chan| chan.post_response(&msg)))
                        {
                            Some(true) => {}
                            Some(false) => self.backlog.push((slot, msg)),
                            None => {
                                debug!(code = event.code.as_str(), "event for a gone state manager dropped")
                            }
                        }
                    }
                    Origin::Internal => {
                        debug!(
                            group = %graph.name(),
                            code = event.code.as_str(),
                            execution_error = event.execution_error,
                            "internal transition event"
                        );
                    }
                }
            }
        }
    }

    fn deliver_initial_results(&mut self) {
        let result = self.engine.initial_result();
        if result == ControlCode::InitialMachineStateNotSet {
            return;
        }
        for (slot, block) in self.engine.channels() {
            let Some(chan) = block.control() else { continue };
            let parked = chan.take_initial_requests();
            for _ in 0..parked {
                let mut msg = ControlMessage::default();
                msg.set_code(result);
                if !chan.post_response(&msg) {
                    self.backlog.push((slot, msg));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
