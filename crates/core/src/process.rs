// SPDX-License-Identifier: Apache-2.0

//! Process state and communication-type enumerations.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed OS process.
///
/// The numeric values are part of the wire contract with the Health Monitor
/// and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ProcessState {
    /// Never started, or fully reaped and forgotten.
    Idle = 0,
    /// Spawned; waiting for the process to report `Running`.
    Starting = 1,
    /// The process reported `Running` through the lifecycle client.
    Running = 2,
    /// Graceful termination requested.
    Terminating = 3,
    /// The OS reported process exit.
    Terminated = 4,
}

impl ProcessState {
    /// Decode a wire byte. Unknown values are rejected rather than mapped.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Idle),
            1 => Some(Self::Starting),
            2 => Some(Self::Running),
            3 => Some(Self::Terminating),
            4 => Some(Self::Terminated),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
        }
    }
}

/// What kind of Launch-Manager communication a process is configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum CommsType {
    /// No shared-memory sync block is created for this process.
    #[default]
    NoComms = 0,
    /// The process reports `Running` through the lifecycle client.
    Reporting = 1,
    /// Reporting plus a control channel: the process is a state manager.
    ControlClient = 2,
    /// The Launch Manager itself.
    LaunchManager = 3,
}

impl CommsType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::NoComms),
            1 => Some(Self::Reporting),
            2 => Some(Self::ControlClient),
            3 => Some(Self::LaunchManager),
            _ => None,
        }
    }

    /// Whether state changes of this process are published to the Health
    /// Monitor over the process-state ring.
    pub fn is_reporting(self) -> bool {
        matches!(self, Self::Reporting | Self::ControlClient)
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
