// SPDX-License-Identifier: Apache-2.0

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hale-core: identifiers, configuration model, wire records and the clock
//! abstraction shared by the Launch Manager and the Health Monitor.

pub mod clock;
pub mod config;
pub mod id;
pub mod limits;
pub mod process;
pub mod supervision;
pub mod wire;

pub use clock::{MonotonicClock, Nanos, OsClock};
#[cfg(any(test, feature = "test-support"))]
pub use clock::FakeClock;
pub use config::{
    ConfigError, ConfigSet, Dependency, MachineConfig, ManagerConfig, OsProcess, ProcessGroup,
    ProcessGroupState, RlimitSet, StartupConfig,
};
pub use id::{IdentifierHash, OFF_STATE, RECOVERY_STATE};
pub use process::{CommsType, ProcessState};
pub use supervision::{
    ElementaryStatus, GlobalStatus, SupervisionErrorInfo, SupervisionKind,
    EXECUTION_ERROR_DEFAULT,
};
pub use wire::{
    CheckpointRecord, ControlClientId, ControlCode, ControlMessage, PosixProcessRecord,
    ProcessGroupStateId, RecoveryRequest,
};
