// SPDX-License-Identifier: Apache-2.0

//! Supervision status vocabulary shared between the Health Monitor and its
//! clients.

use serde::{Deserialize, Serialize};

/// Execution error reported when no process-specific code is configured for
/// the failure.
pub const EXECUTION_ERROR_DEFAULT: u32 = 0;

/// Status of an elementary or local supervision.
///
/// Severity for aggregation is `Ok < Failed < Expired`; `Deactivated` is an
/// absorbing absence and never participates in the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementaryStatus {
    Deactivated,
    Ok,
    Failed,
    Expired,
}

impl ElementaryStatus {
    /// Severity rank; `None` for `Deactivated`.
    pub fn severity(self) -> Option<u8> {
        match self {
            Self::Deactivated => None,
            Self::Ok => Some(0),
            Self::Failed => Some(1),
            Self::Expired => Some(2),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deactivated => "deactivated",
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }
}

/// Status of the Global supervision of a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalStatus {
    Deactivated,
    Ok,
    Failed,
    Expired,
    Stopped,
}

impl GlobalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deactivated => "deactivated",
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Expired => "expired",
            Self::Stopped => "stopped",
        }
    }
}

/// Which elementary supervision produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupervisionKind {
    Alive,
    Deadline,
    Logical,
}

impl SupervisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alive => "alive",
            Self::Deadline => "deadline",
            Self::Logical => "logical",
        }
    }
}

/// Dispatched to the recovery notifiers when a Global supervision stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisionErrorInfo {
    /// Execution error of the process that caused the failure.
    pub execution_error: u32,
    /// Elementary supervision type that expired.
    pub kind: SupervisionKind,
}

#[cfg(test)]
#[path = "supervision_tests.rs"]
mod tests;
