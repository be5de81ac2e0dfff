// SPDX-License-Identifier: Apache-2.0

//! Lifecycle reporting for supervised processes.

use hale_shm::SyncBlock;
use tracing::debug;

use crate::error::ClientError;

/// Execution states a process may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Running,
}

/// Reports the process's execution state to the Launch Manager through the
/// sync block inherited at spawn.
pub struct LifecycleClient {
    block: SyncBlock,
}

impl LifecycleClient {
    pub fn new() -> Result<Self, ClientError> {
        let block = SyncBlock::from_sync_fd().map_err(ClientError::NoSyncBlock)?;
        Ok(Self { block })
    }

    /// Report `Running`. Exactly-once: a second report is an
    /// [`ClientError::InvalidTransition`].
    pub fn report_execution_state(&self, state: ExecutionState) -> Result<(), ClientError> {
        match state {
            ExecutionState::Running => {
                if self.block.sync().report_running() {
                    debug!("reported Running to the launch manager");
                    Ok(())
                } else {
                    Err(ClientError::InvalidTransition)
                }
            }
        }
    }

    /// Poll the termination notice posted before a graceful termination
    /// request.
    pub fn termination_requested(&self) -> bool {
        self.block.sync().termination_requested()
    }

    pub(crate) fn into_block(self) -> SyncBlock {
        self.block
    }
}
