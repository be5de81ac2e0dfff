// SPDX-License-Identifier: Apache-2.0

//! The state-manager side of the control protocol.
//!
//! One request at a time per client (the channel carries one request and
//! one response slot). Asynchronous unexpected-termination events from the
//! Launch Manager may arrive while waiting for a response; they are routed
//! to the registered callback and the wait continues.

use std::sync::atomic::{AtomicU32, Ordering};

use hale_core::wire::{ControlCode, ControlMessage, ProcessGroupStateId};
use hale_core::IdentifierHash;
use hale_shm::{HandlerNudge, SyncBlock};
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::lifecycle::LifecycleClient;

/// Asynchronous report of a process group entering an undefined state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionErrorEvent {
    pub group: IdentifierHash,
    pub execution_error: u32,
    /// True when the failure happened while entering a new state.
    pub on_enter: bool,
}

pub type EventCallback = Box<dyn Fn(ExecutionErrorEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetStateResult {
    Success,
    Failed,
    Cancelled,
    AlreadyInState,
    TransitionToSameState,
    InvalidArguments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialStateResult {
    NotSet,
    Failed,
    Success,
}

pub struct ControlClient {
    block: SyncBlock,
    nudge: HandlerNudge,
    next_future: AtomicU32,
    callback: Option<EventCallback>,
}

impl ControlClient {
    /// Attach to the control channel behind the lifecycle sync block. Fails
    /// for processes not configured as state managers.
    pub fn new(callback: Option<EventCallback>) -> Result<Self, ClientError> {
        let lifecycle = LifecycleClient::new()?;
        Self::from_lifecycle(lifecycle, callback)
    }

    pub(crate) fn from_lifecycle(
        lifecycle: LifecycleClient,
        callback: Option<EventCallback>,
    ) -> Result<Self, ClientError> {
        let block = lifecycle.into_block();
        if block.control().is_none() {
            return Err(ClientError::NotStateManager);
        }
        let nudge = HandlerNudge::open().map_err(ClientError::Communication)?;
        Ok(Self { block, nudge, next_future: AtomicU32::new(1), callback })
    }

    /// Command a process-group state transition and wait for the outcome.
    pub fn set_state(
        &self,
        group: IdentifierHash,
        state: IdentifierHash,
    ) -> Result<SetStateResult, ClientError> {
        let response = self.transact(ControlCode::SetStateRequest, group, state)?;
        match response.decoded_code() {
            ControlCode::SetStateSuccess => Ok(SetStateResult::Success),
            ControlCode::SetStateFailed => Ok(SetStateResult::Failed),
            ControlCode::SetStateCancelled => Ok(SetStateResult::Cancelled),
            ControlCode::SetStateAlreadyInState => Ok(SetStateResult::AlreadyInState),
            ControlCode::SetStateTransitionToSameState => Ok(SetStateResult::TransitionToSameState),
            ControlCode::SetStateInvalidArguments => Ok(SetStateResult::InvalidArguments),
            other => Err(ClientError::UnexpectedResponse(other as u32)),
        }
    }

    /// The result of the machine's initial state transition.
    pub fn get_initial_machine_state(&self) -> Result<InitialStateResult, ClientError> {
        let response = self.transact(
            ControlCode::GetInitialMachineStateRequest,
            IdentifierHash::default(),
            IdentifierHash::default(),
        )?;
        match response.decoded_code() {
            ControlCode::InitialMachineStateNotSet => Ok(InitialStateResult::NotSet),
            ControlCode::InitialMachineStateFailed => Ok(InitialStateResult::Failed),
            ControlCode::InitialMachineStateSuccess => Ok(InitialStateResult::Success),
            other => Err(ClientError::UnexpectedResponse(other as u32)),
        }
    }

    /// The execution error of a process group in an undefined state.
    pub fn get_execution_error(
        &self,
        group: IdentifierHash,
    ) -> Result<Option<u32>, ClientError> {
        let response = self.transact(
            ControlCode::GetExecutionErrorRequest,
            group,
            IdentifierHash::default(),
        )?;
        match response.decoded_code() {
            ControlCode::ExecutionErrorRequestSuccess => Ok(Some(response.execution_error)),
            ControlCode::ExecutionErrorRequestFailed
            | ControlCode::ExecutionErrorInvalidArguments => Ok(None),
            other => Err(ClientError::UnexpectedResponse(other as u32)),
        }
    }

    pub fn validate_state(
        &self,
        group: IdentifierHash,
        state: IdentifierHash,
    ) -> Result<bool, ClientError> {
        let response = self.transact(ControlCode::ValidateProcessGroupState, group, state)?;
        match response.decoded_code() {
            ControlCode::ValidateProcessGroupStateSuccess => Ok(true),
            ControlCode::ValidateProcessGroupStateFailed => Ok(false),
            other => Err(ClientError::UnexpectedResponse(other as u32)),
        }
    }

    fn transact(
        &self,
        code: ControlCode,
        group: IdentifierHash,
        state: IdentifierHash,
    ) -> Result<ControlMessage, ClientError> {
        let future_id = self.next_future.fetch_add(1, Ordering::Relaxed);
        let request =
            ControlMessage::request(code, ProcessGroupStateId::new(group, state), future_id);

        // Present while construction checked it.
        let Some(chan) = self.block.control() else { return Err(ClientError::NotStateManager) };
        chan.send_request(&request, &self.nudge).map_err(ClientError::Communication)?;

        loop {
            let response = chan.wait_response().map_err(ClientError::Communication)?;
            match response.decoded_code() {
                ControlCode::FailedUnexpectedTermination
                | ControlCode::FailedUnexpectedTerminationOnEnter => {
                    self.handle_event(&response);
                }
                _ if response.client.future_id == future_id => return Ok(response),
                stale => {
                    debug!(code = stale.as_str(), "stale control response dropped");
                }
            }
        }
    }

    /// Drain one pending asynchronous event without sending a request.
    pub fn poll_event(&self) -> Result<bool, ClientError> {
        let Some(chan) = self.block.control() else { return Err(ClientError::NotStateManager) };
        match chan
            .wait_response_timeout(std::time::Duration::from_millis(1))
            .map_err(ClientError::Communication)?
        {
            Some(response)
                if matches!(
                    response.decoded_code(),
                    ControlCode::FailedUnexpectedTermination
                        | ControlCode::FailedUnexpectedTerminationOnEnter
                ) =>
            {
                self.handle_event(&response);
                Ok(true)
            }
            Some(response) => {
                warn!(code = response.decoded_code().as_str(), "unsolicited control response");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn handle_event(&self, response: &ControlMessage) {
        let event = ExecutionErrorEvent {
            group: response.pg_state.group_id(),
            execution_error: response.execution_error,
            on_enter: response.decoded_code() == ControlCode::FailedUnexpectedTerminationOnEnter,
        };
        warn!(group = %event.group, code = event.execution_error, "process group entered an undefined state");
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}
