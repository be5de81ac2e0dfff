// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("monitor interface `{name}`: {source}")]
    MonitorSetup { name: String, source: hale_shm::ShmError },

    #[error("process-state ring: {0}")]
    ProcessStateRing(hale_shm::ShmError),

    #[error("recovery notification `{name}`: invalid target path `{path}`")]
    RecoveryTarget { name: String, path: String },
}
