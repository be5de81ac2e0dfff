// SPDX-License-Identifier: Apache-2.0

//! Error type for the shared-memory layer.

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShmError {
    #[error("shm region `{name}` create failed: {source}")]
    Create { name: String, source: Errno },

    #[error("shm region `{name}` open failed: {source}")]
    Open { name: String, source: Errno },

    #[error("mmap failed: {0}")]
    Map(Errno),

    #[error("region too small: need {needed} bytes, have {have}")]
    TooSmall { needed: usize, have: usize },

    #[error("ring layout mismatch: expected element size {expected}, region carries {found}")]
    LayoutMismatch { expected: usize, found: usize },

    #[error("shared object was never initialized by its creator")]
    NotInitialized,

    #[error("semaphore operation failed: {0}")]
    Sem(Errno),

    #[error("process-shared mutex operation failed: {0}")]
    Mutex(Errno),

    #[error("peer slot is busy")]
    SlotBusy,

    #[error("i/o error: {0}")]
    Io(Errno),
}

impl From<std::io::Error> for ShmError {
    fn from(err: std::io::Error) -> Self {
        ShmError::Io(Errno::from_raw(err.raw_os_error().unwrap_or(0)))
    }
}
