// SPDX-License-Identifier: Apache-2.0

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hale-launch: the Launch Manager process orchestrator.
//!
//! One graph per process group drives commanded state transitions in two
//! phases: stop the processes that leave the target state (in reverse
//! dependency order), then start the ones that enter it (in dependency
//! order). Node actions run on a bounded worker pool; a single reaper
//! thread routes OS exits back to the owning node. Every state change of a
//! reporting process is published to the Health Monitor over the
//! process-state ring.

pub mod control;
pub mod error;
pub mod graph;
pub mod manager;
pub mod node;
pub mod notifier;
pub mod osal;
pub mod queue;

pub use control::ControlHandler;
pub use error::LaunchError;
pub use graph::{Graph, GraphState};
pub use manager::{Engine, Nudge, SetStateOutcome};
pub use node::ProcessInfoNode;
pub use notifier::ProcessStateNotifier;
pub use osal::{ProcessOps, StartWait, SystemProcessOps};
pub use queue::{Job, JobQueue};

#[cfg(any(test, feature = "test-support"))]
pub use osal::FakeProcessOps;
