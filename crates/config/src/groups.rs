// SPDX-License-Identifier: Apache-2.0

//! Process-group and supervision definitions file.
//!
//! Cross references in the file are names; this module resolves every one
//! of them to hashed identifiers and indices while the strings are still
//! around.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use hale_core::config::{
    AliveConfig, CheckpointConfig, DeadlineConfig, Dependency, GlobalConfig, HmConfig,
    LocalConfig, LogicalConfig, LogicalNodeConfig, MachineConfig, ManagerConfig,
    MonitorInterfaceConfig, OsProcess, ProcessGroup, ProcessGroupState, RecoveryConfig,
    RlimitSet, SchedulingPolicy, StartupConfig, SupervisedProcessConfig,
};
use hale_core::{CommsType, IdentifierHash, ProcessState, SupervisionKind, OFF_STATE, RECOVERY_STATE};
use serde::Deserialize;
use smol_str::SmolStr;

use crate::LoadError;

#[derive(Debug)]
pub enum GroupsError {
    Parse(toml::de::Error),
    Load(Box<LoadError>),
}

impl From<LoadError> for GroupsError {
    fn from(err: LoadError) -> Self {
        GroupsError::Load(Box::new(err))
    }
}

// ---------------------------------------------------------------------------
// Raw schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFile {
    #[serde(default, rename = "group")]
    groups: Vec<RawGroup>,
    #[serde(default)]
    hm: RawHm,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroup {
    /// Full path, e.g. `/Machine`.
    name: String,
    #[serde(default = "default_cluster")]
    software_cluster: String,
    #[serde(default, rename = "state")]
    states: Vec<RawState>,
    #[serde(default, rename = "process")]
    processes: Vec<RawProcess>,
}

fn default_cluster() -> String {
    "MainCluster".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawState {
    name: String,
    #[serde(default)]
    processes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum RawSched {
    #[default]
    Other,
    Fifo,
    RoundRobin,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum RawTrigger {
    Running,
    Terminated,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDependency {
    /// Process name within the same group.
    on: String,
    trigger: RawTrigger,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProcess {
    name: String,
    executable: PathBuf,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    uid: u32,
    #[serde(default)]
    gid: u32,
    #[serde(default)]
    supplementary_gids: Vec<u32>,
    #[serde(default)]
    cpu_mask: u64,
    #[serde(default)]
    scheduling_policy: RawSched,
    #[serde(default)]
    scheduling_priority: i32,
    limit_data: Option<u64>,
    limit_address_space: Option<u64>,
    limit_stack: Option<u64>,
    limit_cpu_seconds: Option<u64>,
    #[serde(default)]
    comms: CommsType,
    #[serde(default)]
    self_terminating: bool,
    #[serde(default = "default_startup_timeout_ms")]
    startup_timeout_ms: u64,
    #[serde(default = "default_termination_timeout_ms")]
    termination_timeout_ms: u64,
    #[serde(default)]
    restart_attempts: u32,
    #[serde(default)]
    execution_error: u32,
    #[serde(default, rename = "depends")]
    depends: Vec<RawDependency>,
}

fn default_startup_timeout_ms() -> u64 {
    5_000
}

fn default_termination_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHm {
    #[serde(default, rename = "process")]
    processes: Vec<RawHmProcess>,
    #[serde(default, rename = "monitor")]
    monitors: Vec<RawMonitor>,
    #[serde(default, rename = "checkpoint")]
    checkpoints: Vec<RawCheckpoint>,
    #[serde(default, rename = "alive")]
    alives: Vec<RawAlive>,
    #[serde(default, rename = "deadline")]
    deadlines: Vec<RawDeadline>,
    #[serde(default, rename = "logical")]
    logicals: Vec<RawLogical>,
    #[serde(default, rename = "local")]
    locals: Vec<RawLocal>,
    #[serde(default, rename = "global")]
    globals: Vec<RawGlobal>,
    #[serde(default, rename = "recovery")]
    recoveries: Vec<RawRecovery>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHmProcess {
    /// Full process path, e.g. `/Machine/core-app`.
    process: String,
    #[serde(default)]
    platform: bool,
    #[serde(default)]
    states: Vec<String>,
    #[serde(default)]
    execution_errors: Vec<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMonitor {
    name: String,
    process: String,
    writer_uid: u32,
    ring_capacity: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCheckpoint {
    name: String,
    id: u32,
    monitor: String,
    process: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAlive {
    name: String,
    checkpoint: String,
    reference_cycle_ms: u64,
    /// Absent disables the minimum check.
    min_indications: Option<u32>,
    /// Absent disables the maximum check.
    max_indications: Option<u32>,
    #[serde(default)]
    failed_cycles_tolerance: u32,
    buffer_size: Option<u16>,
    #[serde(default)]
    states: Vec<String>,
    #[serde(default)]
    processes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDeadline {
    name: String,
    source: String,
    target: String,
    /// Absent disables the minimum check.
    min_deadline_ms: Option<u64>,
    /// Absent disables the maximum check.
    max_deadline_ms: Option<u64>,
    buffer_size: Option<u16>,
    #[serde(default)]
    states: Vec<String>,
    #[serde(default)]
    processes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTransition {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLogical {
    name: String,
    entries: Vec<String>,
    #[serde(default)]
    finals: Vec<String>,
    #[serde(default, rename = "transition")]
    transitions: Vec<RawTransition>,
    buffer_size: Option<u16>,
    #[serde(default)]
    states: Vec<String>,
    #[serde(default)]
    processes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawLocal {
    name: String,
    #[serde(default)]
    alives: Vec<String>,
    #[serde(default)]
    deadlines: Vec<String>,
    #[serde(default)]
    logicals: Vec<String>,
    buffer_size: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTolerance {
    state: String,
    /// Absent means "never stop on expiry" for this state.
    expired_tolerance_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGlobal {
    name: String,
    #[serde(default)]
    locals: Vec<String>,
    #[serde(default, rename = "tolerance")]
    tolerances: Vec<RawTolerance>,
    #[serde(default)]
    recoveries: Vec<String>,
    buffer_size: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRecovery {
    name: String,
    /// `/Group/State` path to request on escalation.
    target: String,
    timeout_ms: u64,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

fn lookup(
    names: &[(String, usize)],
    name: &str,
    context: &str,
    what: &'static str,
) -> Result<usize, GroupsError> {
    names
        .iter()
        .find(|(n, _)| n == name)
        .map(|&(_, i)| i)
        .ok_or_else(|| {
            LoadError::UnknownReference {
                context: context.to_string(),
                what,
                name: name.to_string(),
            }
            .into()
        })
}

fn convert_group(raw: &RawGroup, unique_index: &mut u32) -> Result<ProcessGroup, GroupsError> {
    let group_id = IdentifierHash::of(&raw.name);
    let by_name: Vec<(String, usize)> =
        raw.processes.iter().enumerate().map(|(i, p)| (p.name.clone(), i)).collect();

    let mut processes = Vec::with_capacity(raw.processes.len());
    for p in &raw.processes {
        let path = format!("{}/{}", raw.name, p.name);
        let mut dependencies = Vec::with_capacity(p.depends.len());
        for dep in &p.depends {
            let target_index = lookup(&by_name, &dep.on, &path, "process")?;
            dependencies.push(Dependency {
                trigger: match dep.trigger {
                    RawTrigger::Running => ProcessState::Running,
                    RawTrigger::Terminated => ProcessState::Terminated,
                },
                target_process: IdentifierHash::of(&format!("{}/{}", raw.name, dep.on)),
                target_index: target_index as u32,
            });
        }

        processes.push(OsProcess {
            process_id: IdentifierHash::of(&path),
            unique_index: {
                let index = *unique_index;
                *unique_index += 1;
                index
            },
            startup: StartupConfig {
                executable: p.executable.clone(),
                short_name: SmolStr::new(&p.name),
                args: p.args.clone(),
                env: p.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                uid: p.uid,
                gid: p.gid,
                supplementary_gids: p.supplementary_gids.clone(),
                cpu_mask: p.cpu_mask,
                scheduling_policy: match p.scheduling_policy {
                    RawSched::Other => SchedulingPolicy::Other,
                    RawSched::Fifo => SchedulingPolicy::Fifo,
                    RawSched::RoundRobin => SchedulingPolicy::RoundRobin,
                },
                scheduling_priority: p.scheduling_priority,
                rlimits: RlimitSet {
                    data: p.limit_data,
                    address_space: p.limit_address_space,
                    stack: p.limit_stack,
                    cpu_seconds: p.limit_cpu_seconds,
                },
                comms_type: p.comms,
            },
            manager: ManagerConfig {
                is_self_terminating: p.self_terminating,
                startup_timeout: Duration::from_millis(p.startup_timeout_ms),
                termination_timeout: Duration::from_millis(p.termination_timeout_ms),
                restart_attempts: p.restart_attempts,
                execution_error_code: p.execution_error,
            },
            dependencies,
        });
    }

    let mut states = Vec::with_capacity(raw.states.len());
    for s in &raw.states {
        let state_path = format!("{}/{}", raw.name, s.name);
        let mut active = Vec::with_capacity(s.processes.len());
        for name in &s.processes {
            active.push(lookup(&by_name, name, &state_path, "process")? as u32);
        }
        states.push(ProcessGroupState { name: IdentifierHash::of(&state_path), active_processes: active });
    }

    let state_id = |short: &str, fallback: IdentifierHash| {
        raw.states
            .iter()
            .find(|s| s.name == short)
            .map(|s| IdentifierHash::of(&format!("{}/{}", raw.name, s.name)))
            .unwrap_or(fallback)
    };

    Ok(ProcessGroup {
        name: group_id,
        software_cluster: IdentifierHash::of(&raw.software_cluster),
        off_state: state_id("Off", OFF_STATE),
        recovery_state: state_id("Recovery", RECOVERY_STATE),
        states,
        processes,
    })
}

fn convert_hm(raw: &RawHm, machine: &MachineConfig) -> Result<HmConfig, GroupsError> {
    let default_buffer = machine.supervision_buffer_size;
    let process_names: Vec<(String, usize)> =
        raw.processes.iter().enumerate().map(|(i, p)| (p.process.clone(), i)).collect();
    let monitor_names: Vec<(String, usize)> =
        raw.monitors.iter().enumerate().map(|(i, m)| (m.name.clone(), i)).collect();
    let checkpoint_names: Vec<(String, usize)> =
        raw.checkpoints.iter().enumerate().map(|(i, c)| (c.name.clone(), i)).collect();

    let processes = raw
        .processes
        .iter()
        .map(|p| SupervisedProcessConfig {
            name: SmolStr::new(&p.process),
            process_id: IdentifierHash::of(&p.process),
            is_platform: p.platform,
            pg_states: p.states.iter().map(|s| IdentifierHash::of(s)).collect(),
            execution_errors: p.execution_errors.clone(),
        })
        .collect();

    let mut monitors = Vec::with_capacity(raw.monitors.len());
    for m in &raw.monitors {
        monitors.push(MonitorInterfaceConfig {
            name: SmolStr::new(&m.name),
            writer_uid: m.writer_uid,
            process: lookup(&process_names, &m.process, &m.name, "supervised process")?,
            ring_capacity: m.ring_capacity.unwrap_or(machine.checkpoint_ring_capacity),
        });
    }

    let mut checkpoints = Vec::with_capacity(raw.checkpoints.len());
    for c in &raw.checkpoints {
        checkpoints.push(CheckpointConfig {
            name: SmolStr::new(&c.name),
            id: c.id,
            monitor: lookup(&monitor_names, &c.monitor, &c.name, "monitor")?,
            process: lookup(&process_names, &c.process, &c.name, "supervised process")?,
        });
    }

    let resolve_processes = |list: &[String], context: &str| -> Result<Vec<usize>, GroupsError> {
        list.iter().map(|p| lookup(&process_names, p, context, "supervised process")).collect()
    };

    let mut alives = Vec::with_capacity(raw.alives.len());
    for a in &raw.alives {
        alives.push(AliveConfig {
            name: SmolStr::new(&a.name),
            checkpoint: lookup(&checkpoint_names, &a.checkpoint, &a.name, "checkpoint")?,
            reference_cycle_ns: a.reference_cycle_ms.saturating_mul(1_000_000),
            min_indications: a.min_indications.unwrap_or(0),
            max_indications: a.max_indications.unwrap_or(u32::MAX),
            min_disabled: a.min_indications.is_none(),
            max_disabled: a.max_indications.is_none(),
            failed_cycles_tolerance: a.failed_cycles_tolerance,
            buffer_size: a.buffer_size.unwrap_or(default_buffer),
            pg_states: a.states.iter().map(|s| IdentifierHash::of(s)).collect(),
            processes: resolve_processes(&a.processes, &a.name)?,
        });
    }

    let mut deadlines = Vec::with_capacity(raw.deadlines.len());
    for d in &raw.deadlines {
        deadlines.push(DeadlineConfig {
            name: SmolStr::new(&d.name),
            source: lookup(&checkpoint_names, &d.source, &d.name, "checkpoint")?,
            target: lookup(&checkpoint_names, &d.target, &d.name, "checkpoint")?,
            min_deadline_ns: d.min_deadline_ms.unwrap_or(0).saturating_mul(1_000_000),
            max_deadline_ns: d.max_deadline_ms.unwrap_or(u64::MAX / 1_000_000).saturating_mul(1_000_000),
            min_disabled: d.min_deadline_ms.is_none(),
            max_disabled: d.max_deadline_ms.is_none(),
            buffer_size: d.buffer_size.unwrap_or(default_buffer),
            pg_states: d.states.iter().map(|s| IdentifierHash::of(s)).collect(),
            processes: resolve_processes(&d.processes, &d.name)?,
        });
    }

    let mut logicals = Vec::with_capacity(raw.logicals.len());
    for l in &raw.logicals {
        // Graph nodes are the checkpoints mentioned anywhere in the
        // supervision, in order of first appearance.
        let mut node_names: Vec<String> = Vec::new();
        for name in l
            .entries
            .iter()
            .chain(l.finals.iter())
            .chain(l.transitions.iter().flat_map(|t| [&t.from, &t.to]))
        {
            if !node_names.contains(name) {
                node_names.push(name.clone());
            }
        }

        let node_index = |name: &str| -> Result<usize, GroupsError> {
            node_names.iter().position(|n| n == name).ok_or_else(|| {
                LoadError::UnknownReference {
                    context: l.name.clone(),
                    what: "graph checkpoint",
                    name: name.to_string(),
                }
                .into()
            })
        };

        let mut nodes = Vec::with_capacity(node_names.len());
        for name in &node_names {
            let mut successors = Vec::new();
            for t in l.transitions.iter().filter(|t| &t.from == name) {
                successors.push(node_index(&t.to)?);
            }
            nodes.push(LogicalNodeConfig {
                checkpoint: lookup(&checkpoint_names, name, &l.name, "checkpoint")?,
                is_final: l.finals.contains(name),
                successors,
            });
        }

        let entries = l
            .entries
            .iter()
            .map(|n| node_index(n))
            .collect::<Result<Vec<_>, GroupsError>>()?;

        logicals.push(LogicalConfig {
            name: SmolStr::new(&l.name),
            nodes,
            entries,
            buffer_size: l.buffer_size.unwrap_or(default_buffer),
            pg_states: l.states.iter().map(|s| IdentifierHash::of(s)).collect(),
            processes: resolve_processes(&l.processes, &l.name)?,
        });
    }

    let alive_names: Vec<(String, usize)> =
        raw.alives.iter().enumerate().map(|(i, a)| (a.name.clone(), i)).collect();
    let deadline_names: Vec<(String, usize)> =
        raw.deadlines.iter().enumerate().map(|(i, d)| (d.name.clone(), i)).collect();
    let logical_names: Vec<(String, usize)> =
        raw.logicals.iter().enumerate().map(|(i, l)| (l.name.clone(), i)).collect();

    let mut locals = Vec::with_capacity(raw.locals.len());
    for l in &raw.locals {
        let mut elementaries = Vec::new();
        for name in &l.alives {
            elementaries.push((SupervisionKind::Alive, lookup(&alive_names, name, &l.name, "alive supervision")?));
        }
        for name in &l.deadlines {
            elementaries.push((
                SupervisionKind::Deadline,
                lookup(&deadline_names, name, &l.name, "deadline supervision")?,
            ));
        }
        for name in &l.logicals {
            elementaries.push((
                SupervisionKind::Logical,
                lookup(&logical_names, name, &l.name, "logical supervision")?,
            ));
        }
        locals.push(LocalConfig {
            name: SmolStr::new(&l.name),
            elementaries,
            buffer_size: l.buffer_size.unwrap_or(default_buffer),
        });
    }

    let local_names: Vec<(String, usize)> =
        raw.locals.iter().enumerate().map(|(i, l)| (l.name.clone(), i)).collect();
    let recovery_names: Vec<(String, usize)> =
        raw.recoveries.iter().enumerate().map(|(i, r)| (r.name.clone(), i)).collect();

    let mut globals = Vec::with_capacity(raw.globals.len());
    for g in &raw.globals {
        let locals_resolved = g
            .locals
            .iter()
            .map(|l| lookup(&local_names, l, &g.name, "local supervision"))
            .collect::<Result<Vec<_>, GroupsError>>()?;
        let recoveries_resolved = g
            .recoveries
            .iter()
            .map(|r| lookup(&recovery_names, r, &g.name, "recovery notification"))
            .collect::<Result<Vec<_>, GroupsError>>()?;
        globals.push(GlobalConfig {
            name: SmolStr::new(&g.name),
            locals: locals_resolved,
            pg_states: g.tolerances.iter().map(|t| IdentifierHash::of(&t.state)).collect(),
            expired_tolerances_ns: g
                .tolerances
                .iter()
                .map(|t| match t.expired_tolerance_ms {
                    Some(ms) => ms.saturating_mul(1_000_000),
                    // Absent = never debounce to Stopped for this state.
                    None => u64::MAX,
                })
                .collect(),
            buffer_size: g.buffer_size.unwrap_or(default_buffer),
            recoveries: recoveries_resolved,
        });
    }

    let recoveries = raw
        .recoveries
        .iter()
        .map(|r| RecoveryConfig {
            name: SmolStr::new(&r.name),
            target_path: SmolStr::new(&r.target),
            timeout_ns: r.timeout_ms.saturating_mul(1_000_000),
        })
        .collect();

    Ok(HmConfig {
        processes,
        monitors,
        checkpoints,
        alives,
        deadlines,
        logicals,
        locals,
        globals,
        recoveries,
    })
}

/// Parse the groups file against the already-loaded machine settings.
pub fn load_groups_str(
    raw: &str,
    machine: &MachineConfig,
) -> Result<(Vec<ProcessGroup>, HmConfig), GroupsError> {
    let raw: RawFile = toml::from_str(raw).map_err(GroupsError::Parse)?;

    let mut unique_index = 0u32;
    let groups = raw
        .groups
        .iter()
        .map(|g| convert_group(g, &mut unique_index))
        .collect::<Result<Vec<_>, GroupsError>>()?;
    let hm = convert_hm(&raw.hm, machine)?;
    Ok((groups, hm))
}

#[cfg(test)]
#[path = "groups_tests.rs"]
mod tests;
