// SPDX-License-Identifier: Apache-2.0

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hale-shm: process-shared primitives.
//!
//! Everything in this crate lives in memory that more than one process maps:
//! named shared-memory regions holding ring buffers, the per-process
//! lifecycle sync block, and the state-manager control channels. Types
//! placed into those regions are `#[repr(C)]`, trivially copyable and
//! constructed in place exactly once, guarded by an acquire/release
//! `initialized` flag.
//!
//! Robustness: the ring mutex is a `PROCESS_SHARED` + `ROBUST`
//! `pthread_mutex_t`. When a holder dies, the next locker observes
//! `EOWNERDEAD`, marks the state consistent and reports the recovery so the
//! caller can treat the ring content as lost rather than trust it.

pub mod control;
pub mod error;
pub mod mutex;
pub mod region;
pub mod ring;
pub mod sem;
pub mod socket;
pub mod sync_block;

pub use control::{ControlChannel, HandlerNudge};
pub use error::ShmError;
pub use region::{AnonRegion, ShmRegion};
pub use ring::ShmRing;
pub use sem::{OwnedSemaphore, Semaphore, WaitOutcome};
pub use socket::ShmSocket;
pub use sync_block::{LifecycleSync, SyncBlock};

use hale_core::wire::{
    CheckpointRecord, ControlMessage, PosixProcessRecord, RecoveryRequest, SetStateCommand,
};

/// Marker for payloads that may be copied through shared memory.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, free of pointers, references and
/// interior mutability, and must tolerate any bit pattern a peer process can
/// write (enum-valued fields go through checked accessors).
pub unsafe trait ShmSafe: Copy + Send + 'static {}

unsafe impl ShmSafe for u8 {}
unsafe impl ShmSafe for u32 {}
unsafe impl ShmSafe for u64 {}
unsafe impl ShmSafe for CheckpointRecord {}
unsafe impl ShmSafe for PosixProcessRecord {}
unsafe impl ShmSafe for ControlMessage {}
unsafe impl ShmSafe for RecoveryRequest {}
unsafe impl ShmSafe for SetStateCommand {}
