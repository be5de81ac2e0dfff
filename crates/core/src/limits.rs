// SPDX-License-Identifier: Apache-2.0

//! Platform-wide constants shared by both daemons and the client libraries.

use std::time::Duration;

/// Maximum number of configured argv entries per process.
pub const MAX_ARGS: usize = 20;

/// Maximum number of configured environment variables per process.
pub const MAX_ENVS: usize = 100;

/// Maximum number of processes across all process groups.
pub const MAX_PROCESSES: usize = 1024;

/// Size of the Launch Manager worker pool.
pub const WORKER_THREADS: usize = 32;

/// Maximum time to wait when adding to or taking from the job queue.
/// A timeout is a failure signal, not a retry cue.
pub const MAX_QUEUE_DELAY: Duration = Duration::from_millis(500);

/// Grace period between SIGTERM and SIGKILL when a termination timeout has
/// no configured value to fall back on.
pub const MAX_SIGKILL_DELAY: Duration = Duration::from_millis(2_000);

/// Polling period of the control-handler scan when no nudge arrives.
pub const HANDLER_POLL_DELAY: Duration = Duration::from_millis(20);

/// Default capacity of a per-application checkpoint ring.
pub const CHECKPOINT_RING_CAPACITY: u16 = 512;

/// Capacity of the process-state ring (LM -> HM). Sized for
/// [`MAX_PROCESSES`] times the four transition states of one full cycle.
pub const PROCESS_STATE_RING_CAPACITY: usize = 4096;

/// Capacity of the HM-internal recovery request ring.
pub const RECOVERY_RING_CAPACITY: usize = 128;

/// Capacity of the CLI -> control daemon shm socket.
pub const CONTROL_SOCKET_CAPACITY: usize = 16;

/// File descriptor at which a spawned process finds its lifecycle sync
/// block. Part of the process startup contract.
pub const SYNC_FD: i32 = 3;

/// Name of the process-state shm region (LM -> HM).
pub const PROCESS_STATE_SHM_NAME: &str = "/hale-process-state";

/// Name of the shm region holding the Launch Manager handler nudge
/// semaphore.
pub const HANDLER_NUDGE_SHM_NAME: &str = "/hale-lm-nudge";

/// Name of the CLI -> control daemon shm socket.
pub const CONTROL_SOCKET_SHM_NAME: &str = "/hale-control";

/// Prefix of per-application checkpoint ring names; the configured monitor
/// interface name is appended.
pub const CHECKPOINT_SHM_PREFIX: &str = "/hale-cp-";
