// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("spawning `{executable}`: {source}")]
    Spawn { executable: String, source: nix::errno::Errno },

    #[error("process-state ring: {0}")]
    NotifierRing(hale_shm::ShmError),

    #[error("lifecycle sync block: {0}")]
    SyncBlock(hale_shm::ShmError),

    #[error("unknown process group")]
    UnknownGroup,

    #[error("unknown process group state")]
    UnknownState,

    #[error("job queue rejected work (bounded wait elapsed)")]
    QueueTimeout,
}
