// SPDX-License-Identifier: Apache-2.0

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hale-daemon: the Launch Manager (`hale-lmd`) and Health Monitor
//! (`hale-hmd`) daemon entry points.

pub mod env;
pub mod lifecycle;
pub mod signal;

pub use lifecycle::{startup, DaemonGuard, LifecycleError};
pub use signal::ShutdownSignal;
