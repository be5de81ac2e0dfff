// SPDX-License-Identifier: Apache-2.0

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hale-client: libraries linked into supervised processes.
//!
//! - [`LifecycleClient`]: report `Running` exactly once through the sync
//!   block at the inherited descriptor.
//! - [`CheckpointReporter`]: publish supervision checkpoints onto the
//!   application's shared-memory ring.
//! - [`ControlClient`]: the state-manager side of the control protocol.
//! - [`RecoveryClient`]: the Health Monitor's bridge from its recovery
//!   notifiers to the control protocol.

mod checkpoint;
mod control;
mod error;
mod lifecycle;
mod recovery;

pub use checkpoint::CheckpointReporter;
pub use control::{ControlClient, ExecutionErrorEvent, InitialStateResult, SetStateResult};
pub use error::ClientError;
pub use lifecycle::{ExecutionState, LifecycleClient};
pub use recovery::RecoveryClient;
