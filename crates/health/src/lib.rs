// SPDX-License-Identifier: Apache-2.0

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hale-health: the Health Monitor supervision engine.
//!
//! A pipeline of chained supervisions per process group: Alive, Deadline and
//! Logical watch checkpoints from the shared-memory bus, Local aggregates
//! them per logical unit, Global aggregates the locals and debounces into
//! `Stopped`, and the recovery notifier closes the loop by requesting a
//! process-group state change from the Launch Manager.
//!
//! Everything advances on the periodic daemon tick: observer callbacks only
//! deposit time-stamped events, `evaluate(sync_ts)` walks them oldest-first
//! and never consumes an event newer than the sync timestamp.

pub mod buffer;
pub mod cluster;
pub mod error;
pub mod event;
pub mod monitor;
pub mod process;
pub mod reader;
pub mod recovery;
pub mod supervision;
pub mod tracker;
pub mod watchdog;

pub use buffer::TimeSortingBuffer;
pub use cluster::{ClusterHandler, TickReport};
pub use error::HealthError;
pub use event::{
    CheckpointSnapshot, ElemRef, LocalStatusUpdate, ProcessIdx, ProcessSnapshot, StatusUpdate,
    UpdateEvent,
};
pub use monitor::{CheckpointDrain, MonitorEvent, MonitorInterface, MonitorState};
pub use process::ProcessMirror;
pub use reader::{ProcessStateReader, ProcessStateSource};
pub use recovery::{
    NotifierState, RecoveryHandler, RecoveryNotifier, RecoveryTicket, TicketOutcome,
};
pub use supervision::{
    AliveSupervision, DeadlineSupervision, GlobalSupervision, LocalSupervision,
    LogicalSupervision,
};
pub use watchdog::{LogWatchdog, Watchdog};

#[cfg(any(test, feature = "test-support"))]
pub use monitor::FakeCheckpointSource;
