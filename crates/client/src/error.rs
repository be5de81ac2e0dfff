// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no lifecycle sync block at the startup descriptor: {0}")]
    NoSyncBlock(hale_shm::ShmError),

    #[error("this process is not configured as a state manager")]
    NotStateManager,

    #[error("communication with the launch manager failed: {0}")]
    Communication(hale_shm::ShmError),

    #[error("`Running` was already reported by this process")]
    InvalidTransition,

    #[error("checkpoint interface `{name}` unavailable: {source}")]
    CheckpointInterface { name: String, source: hale_shm::ShmError },

    #[error("the launch manager answered with an unexpected code {0}")]
    UnexpectedResponse(u32),
}
