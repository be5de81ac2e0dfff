// SPDX-License-Identifier: Apache-2.0

//! Fixed-size records carried over the shared-memory channels.
//!
//! Every type here is `#[repr(C)]`, trivially copyable and free of pointers;
//! the shm crate copies them byte-wise between processes. Enum-valued fields
//! are stored as raw integers with checked accessors so that a corrupted
//! cell can never produce an invalid Rust enum value.

use std::mem;

use crate::id::IdentifierHash;
use crate::process::ProcessState;

/// One application checkpoint report (app -> HM ring).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct CheckpointRecord {
    /// CLOCK_MONOTONIC nanoseconds at the report site. `0` = clock failure.
    pub timestamp: u64,
    /// Configured checkpoint id.
    pub checkpoint_id: u32,
    _pad: u32,
}

impl CheckpointRecord {
    pub fn new(timestamp: u64, checkpoint_id: u32) -> Self {
        Self { timestamp, checkpoint_id, _pad: 0 }
    }
}

/// One process-state transition (LM -> HM ring).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct PosixProcessRecord {
    /// Raw [`IdentifierHash`] of the process path.
    pub id: u64,
    /// Raw [`IdentifierHash`] of the process-group state the process is
    /// active in at the time of the transition.
    pub pg_state_id: u64,
    /// Seconds part of the transition timestamp.
    pub seconds: i64,
    /// Nanoseconds part of the transition timestamp.
    pub nanos: u32,
    /// Raw [`ProcessState`] value.
    pub process_state: u8,
    _pad: [u8; 3],
}

impl PosixProcessRecord {
    pub fn new(
        id: IdentifierHash,
        state: ProcessState,
        pg_state: IdentifierHash,
        timestamp_ns: u64,
    ) -> Self {
        Self {
            id: id.raw(),
            pg_state_id: pg_state.raw(),
            seconds: (timestamp_ns / 1_000_000_000) as i64,
            nanos: (timestamp_ns % 1_000_000_000) as u32,
            process_state: state as u8,
            _pad: [0; 3],
        }
    }

    pub fn process_id(&self) -> IdentifierHash {
        IdentifierHash::from_raw(self.id)
    }

    pub fn pg_state(&self) -> IdentifierHash {
        IdentifierHash::from_raw(self.pg_state_id)
    }

    /// Decoded process state; `None` for a corrupted cell.
    pub fn state(&self) -> Option<ProcessState> {
        ProcessState::from_u8(self.process_state)
    }

    /// Transition timestamp in nanoseconds.
    pub fn timestamp_ns(&self) -> u64 {
        (self.seconds.max(0) as u64)
            .saturating_mul(1_000_000_000)
            .saturating_add(self.nanos as u64)
    }
}

/// Identifies the control client instance and the state-manager process the
/// request originated from. The process coordinates are filled in by the
/// Launch Manager when it picks the request up; the client only owns
/// `future_id` and must get it back unchanged in the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct ControlClientId {
    /// Process group containing the state-manager process.
    pub process_group_index: u16,
    /// The process within the process group.
    pub process_index: u16,
    /// Client-side id to match request and response.
    pub future_id: u32,
}

/// A `(process group, process group state)` pair on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct ProcessGroupStateId {
    pub group: u64,
    pub state: u64,
}

impl ProcessGroupStateId {
    pub fn new(group: IdentifierHash, state: IdentifierHash) -> Self {
        Self { group: group.raw(), state: state.raw() }
    }

    pub fn group_id(&self) -> IdentifierHash {
        IdentifierHash::from_raw(self.group)
    }

    pub fn state_id(&self) -> IdentifierHash {
        IdentifierHash::from_raw(self.state)
    }
}

/// Request and response opcodes of the control protocol. The discriminants
/// are the wire values; gaps group the opcode families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ControlCode {
    NotSet = 0,
    /// Response when the Launch Manager receives a code it does not know.
    InvalidRequest = 1,

    SetStateRequest = 16,
    SetStateInvalidArguments = 17,
    SetStateCancelled = 18,
    SetStateFailed = 19,
    SetStateSuccess = 20,
    SetStateAlreadyInState = 21,
    SetStateTransitionToSameState = 22,

    /// Async event: a process died during a transition into a new state.
    FailedUnexpectedTerminationOnEnter = 23,
    /// Async event: a process died while its group was not in transition.
    FailedUnexpectedTermination = 24,

    GetInitialMachineStateRequest = 32,
    InitialMachineStateNotSet = 33,
    InitialMachineStateFailed = 34,
    InitialMachineStateSuccess = 35,

    GetExecutionErrorRequest = 48,
    ExecutionErrorInvalidArguments = 49,
    ExecutionErrorRequestFailed = 50,
    ExecutionErrorRequestSuccess = 51,

    ValidateProcessGroupState = 64,
    ValidateProcessGroupStateFailed = 65,
    ValidateProcessGroupStateSuccess = 66,
}

impl ControlCode {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::NotSet,
            1 => Self::InvalidRequest,
            16 => Self::SetStateRequest,
            17 => Self::SetStateInvalidArguments,
            18 => Self::SetStateCancelled,
            19 => Self::SetStateFailed,
            20 => Self::SetStateSuccess,
            21 => Self::SetStateAlreadyInState,
            22 => Self::SetStateTransitionToSameState,
            23 => Self::FailedUnexpectedTerminationOnEnter,
            24 => Self::FailedUnexpectedTermination,
            32 => Self::GetInitialMachineStateRequest,
            33 => Self::InitialMachineStateNotSet,
            34 => Self::InitialMachineStateFailed,
            35 => Self::InitialMachineStateSuccess,
            48 => Self::GetExecutionErrorRequest,
            49 => Self::ExecutionErrorInvalidArguments,
            50 => Self::ExecutionErrorRequestFailed,
            51 => Self::ExecutionErrorRequestSuccess,
            64 => Self::ValidateProcessGroupState,
            65 => Self::ValidateProcessGroupStateFailed,
            66 => Self::ValidateProcessGroupStateSuccess,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotSet => "not-set",
            Self::InvalidRequest => "invalid-request",
            Self::SetStateRequest => "set-state-request",
            Self::SetStateInvalidArguments => "set-state-invalid-arguments",
            Self::SetStateCancelled => "set-state-cancelled",
            Self::SetStateFailed => "set-state-failed",
            Self::SetStateSuccess => "set-state-success",
            Self::SetStateAlreadyInState => "set-state-already-in-state",
            Self::SetStateTransitionToSameState => "set-state-transition-to-same-state",
            Self::FailedUnexpectedTerminationOnEnter => "failed-unexpected-termination-on-enter",
            Self::FailedUnexpectedTermination => "failed-unexpected-termination",
            Self::GetInitialMachineStateRequest => "get-initial-machine-state-request",
            Self::InitialMachineStateNotSet => "initial-machine-state-not-set",
            Self::InitialMachineStateFailed => "initial-machine-state-failed",
            Self::InitialMachineStateSuccess => "initial-machine-state-success",
            Self::GetExecutionErrorRequest => "get-execution-error-request",
            Self::ExecutionErrorInvalidArguments => "execution-error-invalid-arguments",
            Self::ExecutionErrorRequestFailed => "execution-error-request-failed",
            Self::ExecutionErrorRequestSuccess => "execution-error-request-success",
            Self::ValidateProcessGroupState => "validate-process-group-state",
            Self::ValidateProcessGroupStateFailed => "validate-process-group-state-failed",
            Self::ValidateProcessGroupStateSuccess => "validate-process-group-state-success",
        }
    }
}

/// A control-channel message: a request, an acknowledgement or a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct ControlMessage {
    /// Originating control client and state-manager process.
    pub client: ControlClientId,
    /// Payload for most requests and responses.
    pub pg_state: ProcessGroupStateId,
    /// Raw [`ControlCode`].
    pub code: u32,
    /// Additional payload for execution-error responses and the
    /// unexpected-termination events.
    pub execution_error: u32,
}

impl ControlMessage {
    pub fn request(code: ControlCode, pg_state: ProcessGroupStateId, future_id: u32) -> Self {
        Self {
            client: ControlClientId { future_id, ..Default::default() },
            pg_state,
            code: code as u32,
            execution_error: 0,
        }
    }

    /// Build the response to `request` with the given code, echoing the
    /// client identification.
    pub fn response_to(request: &ControlMessage, code: ControlCode) -> Self {
        Self {
            client: request.client,
            pg_state: request.pg_state,
            code: code as u32,
            execution_error: 0,
        }
    }

    /// Decoded opcode; a corrupted cell decodes to `InvalidRequest`.
    pub fn decoded_code(&self) -> ControlCode {
        ControlCode::from_u32(self.code).unwrap_or(ControlCode::InvalidRequest)
    }

    pub fn set_code(&mut self, code: ControlCode) {
        self.code = code as u32;
    }
}

/// A recovery request handed from the Global supervision to the recovery
/// forwarder (HM-internal ring).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct RecoveryRequest {
    pub group: u64,
    pub state: u64,
    /// Slot index of the ticket awaiting the outcome.
    pub ticket: u32,
    _pad: u32,
}

impl RecoveryRequest {
    pub fn new(group: IdentifierHash, state: IdentifierHash, ticket: u32) -> Self {
        Self { group: group.raw(), state: state.raw(), ticket, _pad: 0 }
    }
}

/// A set-state command from the lifecycle CLI to the control daemon:
/// the `/Group/State` path, NUL-padded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SetStateCommand {
    pub path: [u8; 128],
}

impl Default for SetStateCommand {
    fn default() -> Self {
        Self { path: [0; 128] }
    }
}

impl SetStateCommand {
    /// Build a command; the path is truncated to the field size.
    pub fn new(path: &str) -> Self {
        let mut cmd = Self::default();
        let bytes = path.as_bytes();
        let len = bytes.len().min(cmd.path.len() - 1);
        cmd.path[..len].copy_from_slice(&bytes[..len]);
        cmd
    }

    /// The configured path, up to the first NUL.
    pub fn path(&self) -> &str {
        let end = self.path.iter().position(|&b| b == 0).unwrap_or(self.path.len());
        std::str::from_utf8(&self.path[..end]).unwrap_or("")
    }
}

// Layout guards: the shm crate copies these records between processes, so
// their sizes are part of the wire contract.
const _: () = assert!(mem::size_of::<CheckpointRecord>() == 16);
const _: () = assert!(mem::size_of::<PosixProcessRecord>() == 32);
const _: () = assert!(mem::size_of::<ControlClientId>() == 8);
const _: () = assert!(mem::size_of::<ProcessGroupStateId>() == 16);
const _: () = assert!(mem::size_of::<ControlMessage>() == 32);
const _: () = assert!(mem::size_of::<RecoveryRequest>() == 24);
const _: () = assert!(mem::size_of::<SetStateCommand>() == 128);

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
