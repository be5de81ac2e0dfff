// SPDX-License-Identifier: Apache-2.0

//! Read-only configuration model.
//!
//! The model is built once at daemon start by the loader crate and never
//! mutated afterwards. All cross references between groups, states,
//! processes, checkpoints and supervisions are plain indices resolved at
//! load time; [`ConfigSet::validate`] checks every one of them so the
//! engines can index without further bounds reasoning.

use std::path::PathBuf;
use std::time::Duration;

use smol_str::SmolStr;
use thiserror::Error;

use crate::id::IdentifierHash;
use crate::limits;
use crate::process::{CommsType, ProcessState};
use crate::supervision::SupervisionKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("process group {group}: state {state} references process index {index} out of range")]
    StateProcessIndex { group: IdentifierHash, state: IdentifierHash, index: u32 },

    #[error("process group {group}: process {process} has dependency target index {index} out of range")]
    DependencyIndex { group: IdentifierHash, process: IdentifierHash, index: u32 },

    #[error("process group {group}: process {process} has dependency trigger {trigger:?}; only Running and Terminated are allowed")]
    DependencyTrigger { group: IdentifierHash, process: IdentifierHash, trigger: ProcessState },

    #[error("process group {group}: process {process} exceeds limit: {what}")]
    ProcessLimit { group: IdentifierHash, process: IdentifierHash, what: &'static str },

    #[error("{owner}: reference `{what}` index {index} out of range")]
    SupervisionIndex { owner: SmolStr, what: &'static str, index: usize },

    #[error("{owner}: {what}")]
    SupervisionParameter { owner: SmolStr, what: &'static str },

    #[error("configuration reload is not supported")]
    Unsupported,
}

/// Resource limits applied with `setrlimit` before exec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RlimitSet {
    /// RLIMIT_DATA in bytes (heap usage).
    pub data: Option<u64>,
    /// RLIMIT_AS in bytes (address-space usage).
    pub address_space: Option<u64>,
    /// RLIMIT_STACK in bytes.
    pub stack: Option<u64>,
    /// RLIMIT_CPU in seconds.
    pub cpu_seconds: Option<u64>,
}

/// Scheduling policy for a spawned process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulingPolicy {
    #[default]
    Other,
    Fifo,
    RoundRobin,
}

/// Everything the OS layer needs to spawn one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupConfig {
    pub executable: PathBuf,
    /// Short name, kept for logging only.
    pub short_name: SmolStr,
    /// argv[1..]; argv[0] is the executable path.
    pub args: Vec<String>,
    /// The complete child environment; nothing is inherited.
    pub env: Vec<(String, String)>,
    pub uid: u32,
    pub gid: u32,
    pub supplementary_gids: Vec<u32>,
    /// CPU affinity mask; `0` leaves the default affinity.
    pub cpu_mask: u64,
    pub scheduling_policy: SchedulingPolicy,
    pub scheduling_priority: i32,
    pub rlimits: RlimitSet,
    pub comms_type: CommsType,
}

impl StartupConfig {
    /// Minimal startup configuration for the given executable, inheriting
    /// the daemon's uid/gid and default scheduling.
    pub fn for_executable(executable: impl Into<PathBuf>, short_name: &str) -> Self {
        Self {
            executable: executable.into(),
            short_name: SmolStr::new(short_name),
            args: Vec::new(),
            env: Vec::new(),
            uid: 0,
            gid: 0,
            supplementary_gids: Vec::new(),
            cpu_mask: 0,
            scheduling_policy: SchedulingPolicy::Other,
            scheduling_priority: 0,
            rlimits: RlimitSet::default(),
            comms_type: CommsType::NoComms,
        }
    }
}

/// Per-process orchestration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// The process may exit on its own without a termination request.
    pub is_self_terminating: bool,
    /// How long to wait for `Running` before flagging an error.
    pub startup_timeout: Duration,
    /// How long to wait for exit after a termination request before
    /// force-terminating.
    pub termination_timeout: Duration,
    /// Times to re-enqueue the node after an unexpected termination.
    pub restart_attempts: u32,
    /// Code reported when this process causes a failure.
    pub execution_error_code: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            is_self_terminating: false,
            startup_timeout: Duration::from_secs(5),
            termination_timeout: Duration::from_secs(2),
            restart_attempts: 0,
            execution_error_code: 0,
        }
    }
}

/// A start-ordering edge: this process may start only once `target_process`
/// has reached `trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// `Running` or `Terminated`.
    pub trigger: ProcessState,
    pub target_process: IdentifierHash,
    /// Index of the target in the enclosing group's `processes`.
    pub target_index: u32,
}

/// Immutable per-process record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsProcess {
    pub process_id: IdentifierHash,
    /// Unique number for this process and startup-configuration pair.
    pub unique_index: u32,
    pub startup: StartupConfig,
    pub manager: ManagerConfig,
    pub dependencies: Vec<Dependency>,
}

/// A named subset of a group's processes that run simultaneously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessGroupState {
    pub name: IdentifierHash,
    /// Indices into the enclosing group's `processes`.
    pub active_processes: Vec<u32>,
}

/// A named set of OS processes with associated states and dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessGroup {
    pub name: IdentifierHash,
    pub software_cluster: IdentifierHash,
    pub off_state: IdentifierHash,
    pub recovery_state: IdentifierHash,
    pub states: Vec<ProcessGroupState>,
    pub processes: Vec<OsProcess>,
}

impl ProcessGroup {
    pub fn state(&self, name: IdentifierHash) -> Option<&ProcessGroupState> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn process_index(&self, id: IdentifierHash) -> Option<u32> {
        self.processes.iter().position(|p| p.process_id == id).map(|i| i as u32)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let count = self.processes.len() as u32;
        for state in &self.states {
            for &index in &state.active_processes {
                if index >= count {
                    return Err(ConfigError::StateProcessIndex {
                        group: self.name,
                        state: state.name,
                        index,
                    });
                }
            }
        }
        for process in &self.processes {
            if process.startup.args.len() > limits::MAX_ARGS {
                return Err(ConfigError::ProcessLimit {
                    group: self.name,
                    process: process.process_id,
                    what: "argv entries",
                });
            }
            if process.startup.env.len() > limits::MAX_ENVS {
                return Err(ConfigError::ProcessLimit {
                    group: self.name,
                    process: process.process_id,
                    what: "environment variables",
                });
            }
            for dep in &process.dependencies {
                if dep.target_index >= count {
                    return Err(ConfigError::DependencyIndex {
                        group: self.name,
                        process: process.process_id,
                        index: dep.target_index,
                    });
                }
                if !matches!(dep.trigger, ProcessState::Running | ProcessState::Terminated) {
                    return Err(ConfigError::DependencyTrigger {
                        group: self.name,
                        process: process.process_id,
                        trigger: dep.trigger,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Machine-level settings (cycle time, watchdog, buffer sizing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    /// Health Monitor tick period.
    pub cycle: Duration,
    /// Watchdog device path; `None` uses the log-only watchdog.
    pub watchdog_device: Option<PathBuf>,
    /// Capacity of the per-supervision time-sorting buffers.
    pub supervision_buffer_size: u16,
    /// Capacity of per-application checkpoint rings.
    pub checkpoint_ring_capacity: u16,
    /// The machine process group driven through the initial state
    /// transition at Launch Manager start.
    pub machine_group: Option<IdentifierHash>,
    /// Initial state of the machine process group.
    pub initial_state: Option<IdentifierHash>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            cycle: Duration::from_millis(10),
            watchdog_device: None,
            supervision_buffer_size: 64,
            checkpoint_ring_capacity: limits::CHECKPOINT_RING_CAPACITY,
            machine_group: None,
            initial_state: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Health Monitor configuration
// ---------------------------------------------------------------------------

/// A process the Health Monitor mirrors, with its per-pg-state execution
/// errors. `pg_states` and `execution_errors` are paired by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedProcessConfig {
    pub name: SmolStr,
    pub process_id: IdentifierHash,
    /// Platform process (LM itself): receives a synthetic activation at
    /// daemon start instead of ring events.
    pub is_platform: bool,
    pub pg_states: Vec<IdentifierHash>,
    pub execution_errors: Vec<u32>,
}

/// One application's checkpoint ring on the daemon side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInterfaceConfig {
    pub name: SmolStr,
    /// uid allowed to write the ring.
    pub writer_uid: u32,
    /// Index into `HmConfig::processes` of the reporting process.
    pub process: usize,
    pub ring_capacity: u16,
}

/// A configured checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointConfig {
    pub name: SmolStr,
    pub id: u32,
    /// Monitor interface the checkpoint arrives through.
    pub monitor: usize,
    /// Owning process (index into `HmConfig::processes`).
    pub process: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliveConfig {
    pub name: SmolStr,
    pub checkpoint: usize,
    pub reference_cycle_ns: u64,
    pub min_indications: u32,
    pub max_indications: u32,
    pub min_disabled: bool,
    pub max_disabled: bool,
    pub failed_cycles_tolerance: u32,
    pub buffer_size: u16,
    pub pg_states: Vec<IdentifierHash>,
    /// Watched processes (indices into `HmConfig::processes`). The first is
    /// the checkpoint producer whose execution error is reported.
    pub processes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlineConfig {
    pub name: SmolStr,
    pub source: usize,
    pub target: usize,
    pub min_deadline_ns: u64,
    pub max_deadline_ns: u64,
    pub min_disabled: bool,
    pub max_disabled: bool,
    pub buffer_size: u16,
    pub pg_states: Vec<IdentifierHash>,
    pub processes: Vec<usize>,
}

/// One node of a logical-supervision checkpoint graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalNodeConfig {
    pub checkpoint: usize,
    pub is_final: bool,
    /// Indices into the owning `LogicalConfig::nodes`.
    pub successors: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalConfig {
    pub name: SmolStr,
    pub nodes: Vec<LogicalNodeConfig>,
    /// Entry nodes (indices into `nodes`).
    pub entries: Vec<usize>,
    pub buffer_size: u16,
    pub pg_states: Vec<IdentifierHash>,
    pub processes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub name: SmolStr,
    /// The aggregated elementary supervisions, by kind and per-kind index.
    pub elementaries: Vec<(SupervisionKind, usize)>,
    pub buffer_size: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalConfig {
    pub name: SmolStr,
    /// Aggregated local supervisions (indices into `HmConfig::locals`).
    pub locals: Vec<usize>,
    /// Paired with `expired_tolerances_ns` by index.
    pub pg_states: Vec<IdentifierHash>,
    pub expired_tolerances_ns: Vec<u64>,
    pub buffer_size: u16,
    /// Recovery notifications dispatched on `Stopped`.
    pub recoveries: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryConfig {
    pub name: SmolStr,
    /// `/Path/To/Group/State` of the recovery target.
    pub target_path: SmolStr,
    pub timeout_ns: u64,
}

/// Everything the Health Monitor daemon constructs from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HmConfig {
    pub processes: Vec<SupervisedProcessConfig>,
    pub monitors: Vec<MonitorInterfaceConfig>,
    pub checkpoints: Vec<CheckpointConfig>,
    pub alives: Vec<AliveConfig>,
    pub deadlines: Vec<DeadlineConfig>,
    pub logicals: Vec<LogicalConfig>,
    pub locals: Vec<LocalConfig>,
    pub globals: Vec<GlobalConfig>,
    pub recoveries: Vec<RecoveryConfig>,
}

impl HmConfig {
    fn check(owner: &SmolStr, what: &'static str, index: usize, len: usize) -> Result<(), ConfigError> {
        if index >= len {
            return Err(ConfigError::SupervisionIndex { owner: owner.clone(), what, index });
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for process in &self.processes {
            if process.pg_states.len() != process.execution_errors.len() {
                return Err(ConfigError::SupervisionParameter {
                    owner: process.name.clone(),
                    what: "pg_states and execution_errors must pair up",
                });
            }
        }
        for monitor in &self.monitors {
            Self::check(&monitor.name, "process", monitor.process, self.processes.len())?;
        }
        for cp in &self.checkpoints {
            Self::check(&cp.name, "monitor", cp.monitor, self.monitors.len())?;
            Self::check(&cp.name, "process", cp.process, self.processes.len())?;
        }
        for alive in &self.alives {
            Self::check(&alive.name, "checkpoint", alive.checkpoint, self.checkpoints.len())?;
            for &p in &alive.processes {
                Self::check(&alive.name, "process", p, self.processes.len())?;
            }
            if alive.reference_cycle_ns == 0 {
                return Err(ConfigError::SupervisionParameter {
                    owner: alive.name.clone(),
                    what: "reference_cycle_ns must be non-zero",
                });
            }
            if alive.processes.is_empty() {
                return Err(ConfigError::SupervisionParameter {
                    owner: alive.name.clone(),
                    what: "at least one watched process is required",
                });
            }
        }
        for deadline in &self.deadlines {
            Self::check(&deadline.name, "source checkpoint", deadline.source, self.checkpoints.len())?;
            Self::check(&deadline.name, "target checkpoint", deadline.target, self.checkpoints.len())?;
            for &p in &deadline.processes {
                Self::check(&deadline.name, "process", p, self.processes.len())?;
            }
        }
        for logical in &self.logicals {
            for node in &logical.nodes {
                Self::check(&logical.name, "checkpoint", node.checkpoint, self.checkpoints.len())?;
                for &s in &node.successors {
                    Self::check(&logical.name, "graph node", s, logical.nodes.len())?;
                }
            }
            for &e in &logical.entries {
                Self::check(&logical.name, "entry node", e, logical.nodes.len())?;
            }
            for &p in &logical.processes {
                Self::check(&logical.name, "process", p, self.processes.len())?;
            }
        }
        for local in &self.locals {
            for &(kind, index) in &local.elementaries {
                let len = match kind {
                    SupervisionKind::Alive => self.alives.len(),
                    SupervisionKind::Deadline => self.deadlines.len(),
                    SupervisionKind::Logical => self.logicals.len(),
                };
                Self::check(&local.name, "elementary supervision", index, len)?;
            }
        }
        for global in &self.globals {
            for &l in &global.locals {
                Self::check(&global.name, "local supervision", l, self.locals.len())?;
            }
            for &r in &global.recoveries {
                Self::check(&global.name, "recovery notification", r, self.recoveries.len())?;
            }
            if global.pg_states.len() != global.expired_tolerances_ns.len() {
                return Err(ConfigError::SupervisionParameter {
                    owner: global.name.clone(),
                    what: "pg_states and expired_tolerances_ns must pair up",
                });
            }
        }
        for recovery in &self.recoveries {
            if !recovery.target_path.contains('/') {
                return Err(ConfigError::SupervisionParameter {
                    owner: recovery.name.clone(),
                    what: "target_path must be a /Group/State path",
                });
            }
        }
        Ok(())
    }
}

/// The complete loaded configuration of both daemons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSet {
    pub machine: MachineConfig,
    pub groups: Vec<ProcessGroup>,
    pub hm: HmConfig,
}

impl ConfigSet {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for group in &self.groups {
            group.validate()?;
        }
        self.hm.validate()
    }

    pub fn group(&self, name: IdentifierHash) -> Option<&ProcessGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Configuration updates during a software-update session.
    /// TODO: wire this up once the update-session workflow lands.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        Err(ConfigError::Unsupported)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
